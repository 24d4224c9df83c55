// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Media device enumeration with entity graph listing.

use crate::error::CliError;
use camflow::geometry::Size;
use camflow::media::{DeviceEnumerator, EntityFunction};
use camflow::sim::{ipu3_enumerator, SimSensor};
use clap::Args as ClapArgs;
use serde::Serialize;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// List the synthetic IPU3 topology instead of scanning /dev/media*
    #[arg(long)]
    sim: bool,

    /// Show the entity graph of each device
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct DevicesOutput {
    devices: Vec<DeviceInfo>,
}

#[derive(Debug, Serialize)]
struct DeviceInfo {
    path: String,
    driver: String,
    model: String,
    entities: Vec<EntityInfo>,
}

#[derive(Debug, Serialize)]
struct EntityInfo {
    name: String,
    function: String,
    pads: usize,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing devices command: {:?}", args);

    let enumerator = if args.sim {
        ipu3_enumerator(&[SimSensor::bayer("imx219", Size::new(3280, 2464))]).0
    } else {
        DeviceEnumerator::system()
            .map_err(|e| CliError::General(format!("failed to enumerate media devices: {}", e)))?
    };

    let devices: Vec<DeviceInfo> = enumerator
        .devices()
        .iter()
        .map(|device| {
            let entities = device.with_topology(|topo| {
                topo.entities()
                    .iter()
                    .map(|entity| EntityInfo {
                        name: entity.name.clone(),
                        function: function_name(entity.function),
                        pads: entity.pads.len(),
                    })
                    .collect()
            });
            DeviceInfo {
                path: device.dev_node().display().to_string(),
                driver: device.driver().to_string(),
                model: device.model().to_string(),
                entities,
            }
        })
        .collect();

    let output = DevicesOutput { devices };

    if json {
        println!("{}", serde_json::to_string_pretty(&output).unwrap());
        return Ok(());
    }

    if output.devices.is_empty() {
        println!("No media devices found");
        return Ok(());
    }

    for device in &output.devices {
        println!("{}: {} ({})", device.path, device.model, device.driver);
        if args.verbose {
            for entity in &device.entities {
                println!(
                    "  {} [{}] {} pad{}",
                    entity.name,
                    entity.function,
                    entity.pads,
                    if entity.pads == 1 { "" } else { "s" }
                );
            }
        }
    }
    println!("{} media device(s)", output.devices.len());

    Ok(())
}

fn function_name(function: EntityFunction) -> String {
    match function {
        EntityFunction::CameraSensor => "camera sensor".to_string(),
        EntityFunction::IoVideo => "video node".to_string(),
        EntityFunction::Other(code) => format!("subdevice (0x{:08x})", code),
    }
}
