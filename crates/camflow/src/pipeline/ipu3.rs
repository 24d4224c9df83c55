// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Pipeline handler for Intel IPU3-class hardware.
//!
//! The pipeline couples a CIO2 CSI-2 receiver complex (up to four ports,
//! each optionally fed by an image sensor) with up to two ImgU processing
//! instances. Raw 10-bit Bayer frames are captured from the CIO2 video
//! nodes; the ImgU consumes them and produces the main output, a viewfinder
//! output and 3A statistics.

use std::sync::{Arc, Mutex};

use crate::buffer::Buffer;
use crate::event::EventDispatcher;
use crate::fourcc::FourCC;
use crate::geometry::{Rectangle, Size};
use crate::media::{DeviceEnumerator, DeviceMatch, EntityFunction, MediaDevice};
use crate::pipeline::{
    CameraData, CameraId, CameraRegistrar, CameraSignals, PipelineHandler,
};
use crate::request::Request;
use crate::signal::Signal;
use crate::stream::{Stream, StreamConfiguration, StreamRole};
use crate::v4l2::{
    DeviceFormat, Subdevice, SubdeviceFormat, VideoNode, MEDIA_BUS_FMT_FIXED,
    MEDIA_BUS_FMT_SBGGR10_1X10, MEDIA_BUS_FMT_SGBRG10_1X10, MEDIA_BUS_FMT_SGRBG10_1X10,
    MEDIA_BUS_FMT_SRGGB10_1X10,
};
use crate::Error;

/// The pipeline exposes a single raw stream per camera.
const STREAM: usize = 0;

const PAD_INPUT: u32 = 0;
const PAD_OUTPUT: u32 = 2;
const PAD_VF: u32 = 3;
const PAD_STAT: u32 = 4;

/// Registration factory, seeded into the handler table by the manager.
pub fn create(dispatcher: Arc<EventDispatcher>) -> Box<dyn PipelineHandler> {
    Box::new(Ipu3Pipeline::new(dispatcher))
}

/// Map a sensor media-bus code to the IPU3 packed-Bayer fourcc the CIO2
/// produces for it.
pub fn mbus_to_fourcc(code: u32) -> Option<FourCC> {
    match code {
        MEDIA_BUS_FMT_SBGGR10_1X10 => Some(FourCC::IPU3_SBGGR10),
        MEDIA_BUS_FMT_SGBRG10_1X10 => Some(FourCC::IPU3_SGBRG10),
        MEDIA_BUS_FMT_SGRBG10_1X10 => Some(FourCC::IPU3_SGRBG10),
        MEDIA_BUS_FMT_SRGGB10_1X10 => Some(FourCC::IPU3_SRGGB10),
        _ => None,
    }
}

/// Inverse of [`mbus_to_fourcc`].
pub fn fourcc_to_mbus(fourcc: FourCC) -> Option<u32> {
    match fourcc {
        FourCC::IPU3_SBGGR10 => Some(MEDIA_BUS_FMT_SBGGR10_1X10),
        FourCC::IPU3_SGBRG10 => Some(MEDIA_BUS_FMT_SGBRG10_1X10),
        FourCC::IPU3_SGRBG10 => Some(MEDIA_BUS_FMT_SGRBG10_1X10),
        FourCC::IPU3_SRGGB10 => Some(MEDIA_BUS_FMT_SRGGB10_1X10),
        _ => None,
    }
}

/// One ImgU video output and the subdevice pad feeding it.
struct ImgUOutput {
    dev: VideoNode,
    pad: u32,
    name: &'static str,
}

/// One ImgU processing instance: the subdevice plus its input and output
/// video nodes.
struct ImgUDevice {
    name: String,
    imgu: Subdevice,
    input: VideoNode,
    output: ImgUOutput,
    viewfinder: ImgUOutput,
    stat: ImgUOutput,
}

impl ImgUDevice {
    fn init(
        media: &MediaDevice,
        index: usize,
        dispatcher: &Arc<EventDispatcher>,
    ) -> Result<ImgUDevice, Error> {
        let name = format!("ipu3-imgu {}", index);

        // Entity presence was verified by match(); lookups cannot fail here
        // short of the graph changing under us.
        let imgu = Subdevice::from_entity(media, &name)?;
        imgu.open()?;

        let input = VideoNode::from_entity(media, &format!("{} input", name), dispatcher)?;
        input.open()?;

        let io_output = |suffix: &str, pad, short| -> Result<ImgUOutput, Error> {
            let dev = VideoNode::from_entity(media, &format!("{} {}", name, suffix), dispatcher)?;
            dev.open()?;
            Ok(ImgUOutput { dev, pad, name: short })
        };
        let output = io_output("output", PAD_OUTPUT, "output")?;
        let viewfinder = io_output("viewfinder", PAD_VF, "viewfinder")?;
        let stat = io_output("3a stat", PAD_STAT, "stat")?;

        Ok(ImgUDevice { name, imgu, input, output, viewfinder, stat })
    }

    /// Configure the ImgU input chain for the CIO2 output format.
    fn configure_input(
        &self,
        config: &StreamConfiguration,
        input_format: DeviceFormat,
    ) -> Result<(), Error> {
        let input_format = self.input.set_format(input_format)?;
        log::debug!("{}: input format = {}", self.name, input_format);

        // The IPU3 driver takes the full input rectangle on the input pad
        // for both the feeder crop and the BDS compose.
        let rect = Rectangle::from_size(input_format.size);
        self.imgu.set_crop(PAD_INPUT, rect)?;
        self.imgu.set_compose(PAD_INPUT, rect)?;
        log::debug!("{}: input feeder and BDS rectangle = {}", self.name, rect);

        let gdc = SubdeviceFormat { size: config.size(), mbus_code: MEDIA_BUS_FMT_FIXED };
        let gdc = self.imgu.set_format(PAD_INPUT, gdc)?;
        log::debug!("{}: GDC format = {}", self.name, gdc);

        Ok(())
    }

    /// Configure one ImgU output at the requested stream size.
    fn configure_output(
        &self,
        output: &ImgUOutput,
        config: &StreamConfiguration,
    ) -> Result<(), Error> {
        let format = SubdeviceFormat { size: config.size(), mbus_code: MEDIA_BUS_FMT_FIXED };
        self.imgu.set_format(output.pad, format)?;

        // The stat node carries metadata; it takes no video format.
        if output.pad == PAD_STAT {
            return Ok(());
        }

        let node_format = DeviceFormat { size: config.size(), fourcc: FourCC::NV12, planes: 2 };
        let node_format = output.dev.set_format(node_format)?;
        log::debug!("{}: {} format = {}", self.name, output.name, node_format);

        Ok(())
    }
}

/// One CIO2 port: the capture video node, the CSI-2 receiver subdevice and
/// the sensor feeding it.
struct Cio2Device {
    output: VideoNode,
    csi2: Subdevice,
    sensor: Subdevice,
    /// Media-bus code producing the largest supported size.
    mbus_code: u32,
    /// Largest frame the sensor produces in a supported code.
    max_size: Size,
}

impl Cio2Device {
    /// Probe CSI-2 port `index` and set up its sensor, if a supported one
    /// is connected. Returns [`Error::NoDevice`] when the port should be
    /// skipped.
    fn init(
        media: &MediaDevice,
        index: usize,
        dispatcher: &Arc<EventDispatcher>,
    ) -> Result<Cio2Device, Error> {
        let csi2_name = format!("ipu3-csi2 {}", index);
        let csi2_entity = media.entity_by_name(&csi2_name).ok_or(Error::NoDevice)?;

        // CSI-2 receivers have a single sink pad at index 0; follow its
        // first link back to the connected entity.
        let walk = media.with_topology(|topo| {
            let sink = *topo.entity(csi2_entity).pads.first()?;
            let link_id = *topo.pad(sink).links.first()?;
            let source = topo.pad(topo.link(link_id).source);
            Some((link_id, source.entity, topo.entity(source.entity).function))
        });
        let Some((link_id, sensor_entity, function)) = walk else {
            return Err(Error::NoDevice);
        };
        if function != EntityFunction::CameraSensor {
            return Err(Error::NoDevice);
        }

        media.setup_link(link_id, true)?;

        let sensor = Subdevice::from_entity_id(media, sensor_entity)?;
        sensor.open()?;

        // Require at least one format the CIO2 can consume, and cache the
        // sensor maximum for later bounds checks.
        let mut max_size = Size::default();
        let mut mbus_code = 0;
        for (code, ranges) in sensor.formats(0)? {
            if mbus_to_fourcc(code).is_none() {
                continue;
            }
            for range in ranges {
                if max_size.width < range.max.width && max_size.height < range.max.height {
                    max_size = range.max;
                    mbus_code = code;
                }
            }
        }
        if max_size.width == 0 {
            log::info!(
                "sensor '{}' detected, but no supported image format found: \
                 skip camera creation",
                sensor.name()
            );
            return Err(Error::NoDevice);
        }

        let csi2 = Subdevice::from_entity_id(media, csi2_entity)?;
        csi2.open()?;

        let output =
            VideoNode::from_entity(media, &format!("ipu3-cio2 {}", index), dispatcher)?;
        output.open()?;

        Ok(Cio2Device { output, csi2, sensor, mbus_code, max_size })
    }

    /// Propagate the requested stream size through sensor, CSI-2 receiver
    /// and capture node; returns the negotiated capture format.
    fn configure(&self, config: &StreamConfiguration) -> Result<DeviceFormat, Error> {
        let image_size = config.size().area();
        let mut best: Option<(u64, SubdeviceFormat)> = None;

        for (code, ranges) in self.sensor.formats(0)? {
            // Only consider formats consumable by the CIO2 unit.
            if mbus_to_fourcc(code).is_none() {
                continue;
            }
            for range in ranges {
                // The IPU3 cannot up-scale: only sizes enclosing the
                // request qualify, and the smallest such size wins. Ties go
                // to the first format encountered.
                if range.max.width < config.width || range.max.height < config.height {
                    continue;
                }
                let diff = range.max.area() - image_size;
                if best.as_ref().is_some_and(|(b, _)| diff >= *b) {
                    continue;
                }
                best = Some((diff, SubdeviceFormat { size: range.max, mbus_code: code }));
            }
        }

        let (_, sensor_format) = best.ok_or_else(|| {
            Error::invalid(format!("no sensor format encloses {}", config.size()))
        })?;

        // Apply the selected format to the sensor, the CSI-2 receiver and
        // the CIO2 capture node.
        let applied = self.sensor.set_format(0, sensor_format)?;
        let applied = self.csi2.set_format(0, applied)?;

        let fourcc = mbus_to_fourcc(applied.mbus_code)
            .ok_or_else(|| Error::invalid("sensor selected an unsupported media-bus code"))?;
        let output_format =
            DeviceFormat { size: applied.size, fourcc, planes: 1 };
        let output_format = self.output.set_format(output_format)?;
        log::debug!("CIO2 output format {}", output_format);

        Ok(output_format)
    }
}

/// Per-camera state: the CIO2 port, the assigned ImgU instance, the single
/// raw stream and the request queue.
struct Ipu3Camera {
    name: String,
    cio2: Cio2Device,
    imgu_index: usize,
    stream: Stream,
    data: Arc<Mutex<CameraData>>,
}

/// Pipeline handler for the IPU3 CIO2 + ImgU pair.
pub struct Ipu3Pipeline {
    dispatcher: Arc<EventDispatcher>,
    cio2_media: Option<Arc<MediaDevice>>,
    imgu_media: Option<Arc<MediaDevice>>,
    imgu: Vec<ImgUDevice>,
    cameras: Vec<Ipu3Camera>,
}

impl Ipu3Pipeline {
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Ipu3Pipeline {
        Ipu3Pipeline {
            dispatcher,
            cio2_media: None,
            imgu_media: None,
            imgu: Vec::new(),
            cameras: Vec::new(),
        }
    }

    fn camera(&self, id: CameraId) -> Result<&Ipu3Camera, Error> {
        self.cameras.get(id).ok_or_else(|| Error::invalid(format!("unknown camera {}", id)))
    }

    fn camera_mut(&mut self, id: CameraId) -> Result<&mut Ipu3Camera, Error> {
        self.cameras.get_mut(id).ok_or_else(|| Error::invalid(format!("unknown camera {}", id)))
    }

    fn release_media(&mut self) {
        if let Some(media) = self.cio2_media.take() {
            media.release();
        }
        if let Some(media) = self.imgu_media.take() {
            media.release();
        }
    }

    fn setup_and_register(
        &mut self,
        cio2_media: &Arc<MediaDevice>,
        imgu_media: &Arc<MediaDevice>,
        registrar: &mut CameraRegistrar,
    ) -> Result<usize, Error> {
        // Disable all default-enabled links; camera registration enables
        // only the links it needs. The devices stay open just long enough
        // for link manipulation.
        cio2_media.open()?;
        cio2_media.disable_links()?;
        imgu_media.open()?;
        imgu_media.disable_links()?;

        self.register_cameras(cio2_media, imgu_media, registrar)
    }

    /// Create a camera for each CSI-2 port with a usable sensor, capped at
    /// the two available ImgU instances.
    fn register_cameras(
        &mut self,
        cio2_media: &Arc<MediaDevice>,
        imgu_media: &Arc<MediaDevice>,
        registrar: &mut CameraRegistrar,
    ) -> Result<usize, Error> {
        self.imgu.clear();
        for index in 0..2 {
            self.imgu.push(ImgUDevice::init(imgu_media, index, &self.dispatcher)?);
        }

        let mut registered = 0;
        for id in 0..4 {
            if registered >= 2 {
                break;
            }

            let cio2 = match Cio2Device::init(cio2_media, id, &self.dispatcher) {
                Ok(cio2) => cio2,
                Err(Error::NoDevice) => continue,
                Err(err) => {
                    log::warn!("CSI-2 receiver {}: {}", id, err);
                    continue;
                }
            };

            let sensor_format = cio2.sensor.get_format(0)?;
            let stream = Stream::new(StreamConfiguration {
                width: sensor_format.size.width,
                height: sensor_format.size.height,
                pixel_format: mbus_to_fourcc(cio2.mbus_code).unwrap_or(FourCC::IPU3_SGRBG10),
                buffer_count: 4,
            });

            let signals = CameraSignals::new();
            let data = Arc::new(Mutex::new(CameraData::new()));
            connect_buffer_ready(cio2.output.buffer_ready(), &data, &signals);

            let name = format!("{} {}", cio2.sensor.name(), id);
            let camera_id = self.cameras.len();
            self.cameras.push(Ipu3Camera {
                name: name.clone(),
                cio2,
                // ImgU instances are assigned in registration order.
                imgu_index: registered,
                stream,
                data,
            });
            registrar.register(name.clone(), camera_id, signals);

            log::info!(
                "camera \"{}\" connected to CSI-2 receiver {}, ImgU {}",
                name,
                id,
                registered
            );
            registered += 1;
        }

        if registered == 0 {
            Err(Error::NoDevice)
        } else {
            Ok(registered)
        }
    }
}

/// Wire a CIO2 capture node's completions into the request engine.
///
/// The slot runs in the dispatcher context. It mutates the queue under its
/// own lock and emits the camera signals after releasing it, so slots may
/// re-enter `queue_request` from within a completion callback.
fn connect_buffer_ready(
    buffer_ready: &Signal<Buffer>,
    data: &Arc<Mutex<CameraData>>,
    signals: &Arc<CameraSignals>,
) {
    let data = data.clone();
    let signals = signals.clone();
    buffer_ready.connect(move |buffer: &Buffer| {
        let completion = data.lock().unwrap().complete_head(STREAM, buffer);
        let Some(completion) = completion else { return };

        if let Some(own) = completion.request.buffer(STREAM) {
            signals.buffer_completed.emit(&completion.request, own);
        }
        if completion.finished {
            signals.request_completed.emit(&completion.request);
        }
    });
}

impl PipelineHandler for Ipu3Pipeline {
    fn name(&self) -> &'static str {
        "ipu3"
    }

    fn match_devices(
        &mut self,
        enumerator: &DeviceEnumerator,
        registrar: &mut CameraRegistrar,
    ) -> bool {
        let mut cio2_dm = DeviceMatch::new("ipu3-cio2");
        for index in 0..4 {
            cio2_dm.add(&format!("ipu3-csi2 {}", index));
            cio2_dm.add(&format!("ipu3-cio2 {}", index));
        }

        let mut imgu_dm = DeviceMatch::new("ipu3-imgu");
        for index in 0..2 {
            imgu_dm.add(&format!("ipu3-imgu {}", index));
            for suffix in ["input", "parameters", "output", "viewfinder", "3a stat"] {
                imgu_dm.add(&format!("ipu3-imgu {} {}", index, suffix));
            }
        }

        // search() skips busy devices, so acquiring both here is safe.
        let Some(cio2_media) = enumerator.search(&cio2_dm) else {
            return false;
        };
        if !cio2_media.acquire() {
            return false;
        }
        self.cio2_media = Some(cio2_media.clone());

        let Some(imgu_media) = enumerator.search(&imgu_dm) else {
            self.release_media();
            return false;
        };
        if !imgu_media.acquire() {
            self.release_media();
            return false;
        }
        self.imgu_media = Some(imgu_media.clone());

        let result = self.setup_and_register(&cio2_media, &imgu_media, registrar);
        cio2_media.close();
        imgu_media.close();

        match result {
            Ok(count) => count > 0,
            Err(err) => {
                log::debug!("ipu3 match failed: {}", err);
                self.release_media();
                false
            }
        }
    }

    fn default_configuration(
        &mut self,
        camera: CameraId,
        roles: &[StreamRole],
    ) -> Result<Vec<StreamConfiguration>, Error> {
        let cam = self.camera(camera)?;

        // Suggest the format currently active on the sensor; per-role
        // defaults can refine this later.
        let format = cam.cio2.sensor.get_format(0)?;
        let config = StreamConfiguration {
            width: format.size.width,
            height: format.size.height,
            pixel_format: mbus_to_fourcc(cam.cio2.mbus_code).unwrap_or(FourCC::IPU3_SGRBG10),
            buffer_count: 4,
        };

        Ok(roles.iter().map(|_| config).collect())
    }

    fn configure(
        &mut self,
        camera: CameraId,
        config: &[StreamConfiguration],
    ) -> Result<(), Error> {
        let [cfg] = config else {
            return Err(Error::invalid("the IPU3 pipeline exposes a single stream"));
        };
        let cam = self.camera(camera)?;

        log::info!("requested image format {} on camera '{}'", cfg, cam.name);

        // The ImgU requires the image width to be a multiple of 8 pixels
        // and its height a multiple of 4.
        if cfg.width % 8 != 0 || cfg.height % 4 != 0 {
            log::error!("invalid stream size: bad alignment");
            return Err(Error::invalid("stream size alignment"));
        }
        if cfg.width > cam.cio2.max_size.width || cfg.height > cam.cio2.max_size.height {
            log::error!("invalid stream size: larger than sensor resolution");
            return Err(Error::invalid("stream size larger than sensor resolution"));
        }

        // Pass the requested size to the CIO2 and propagate the adjusted
        // format to the ImgU stages.
        let cio2_format = cam.cio2.configure(cfg)?;

        let imgu = &self.imgu[cam.imgu_index];
        imgu.configure_input(cfg, cio2_format)?;
        imgu.configure_output(&imgu.output, cfg)?;
        imgu.configure_output(&imgu.viewfinder, cfg)?;
        imgu.configure_output(&imgu.stat, cfg)?;

        self.camera_mut(camera)?.stream.configuration = *cfg;
        Ok(())
    }

    fn allocate_buffers(&mut self, camera: CameraId) -> Result<(), Error> {
        let cam = self.camera_mut(camera)?;
        let count = cam.stream.configuration.buffer_count;
        if count == 0 {
            return Err(Error::invalid("buffer count is zero"));
        }

        cam.cio2.output.export_buffers(&mut cam.stream.pool, count).map_err(|err| {
            log::error!("failed to request memory: {}", err);
            err
        })
    }

    fn free_buffers(&mut self, camera: CameraId) -> Result<(), Error> {
        let cam = self.camera_mut(camera)?;
        cam.cio2.output.release_buffers(&mut cam.stream.pool).map_err(|err| {
            log::error!("failed to release memory: {}", err);
            err
        })
    }

    fn create_buffer(
        &mut self,
        camera: CameraId,
        stream: usize,
        index: u32,
    ) -> Result<Buffer, Error> {
        if stream != STREAM {
            return Err(Error::invalid(format!("unknown stream {}", stream)));
        }
        self.camera(camera)?.stream.pool.create_buffer(index)
    }

    fn start(&mut self, camera: CameraId) -> Result<(), Error> {
        let cam = self.camera(camera)?;
        cam.cio2.output.stream_on().map_err(|err| {
            log::info!("failed to start camera {}", cam.name);
            err
        })
    }

    fn stop(&mut self, camera: CameraId) -> Vec<Request> {
        let Ok(cam) = self.camera(camera) else {
            return Vec::new();
        };
        if let Err(err) = cam.cio2.output.stream_off() {
            log::info!("failed to stop camera {}: {}", cam.name, err);
        }
        cam.data.lock().unwrap().cancel_all()
    }

    fn queue_request(&mut self, camera: CameraId, request: Request) -> Result<(), Error> {
        let cam = self.camera(camera)?;

        let Some(buffer) = request.buffer(STREAM) else {
            log::error!("attempt to queue request with invalid stream");
            return Err(Error::NoEntry);
        };
        cam.cio2.output.queue_buffer(buffer)?;

        cam.data.lock().unwrap().push(request);
        Ok(())
    }
}

impl Drop for Ipu3Pipeline {
    fn drop(&mut self) {
        self.release_media();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ipu3_enumerator, SimSensor};

    fn handler_with_sensor() -> (Ipu3Pipeline, CameraRegistrar, DeviceEnumerator) {
        let (enumerator, _hub) =
            ipu3_enumerator(&[SimSensor::bayer("imx219", Size::new(3264, 2448))]);
        let dispatcher = Arc::new(EventDispatcher::new());
        let handler = Ipu3Pipeline::new(dispatcher);
        (handler, CameraRegistrar::new(), enumerator)
    }

    #[test]
    fn test_mbus_fourcc_roundtrip() {
        for code in [
            MEDIA_BUS_FMT_SBGGR10_1X10,
            MEDIA_BUS_FMT_SGBRG10_1X10,
            MEDIA_BUS_FMT_SGRBG10_1X10,
            MEDIA_BUS_FMT_SRGGB10_1X10,
        ] {
            let fourcc = mbus_to_fourcc(code).unwrap();
            assert_eq!(fourcc_to_mbus(fourcc), Some(code));
        }
        assert!(mbus_to_fourcc(MEDIA_BUS_FMT_FIXED).is_none());
        assert!(fourcc_to_mbus(FourCC::NV12).is_none());
    }

    #[test]
    fn test_match_registers_one_camera() {
        let (mut handler, mut registrar, enumerator) = handler_with_sensor();
        assert!(handler.match_devices(&enumerator, &mut registrar));

        let cameras = registrar.take();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].name, "imx219 0");
        assert_eq!(cameras[0].id, 0);
    }

    #[test]
    fn test_match_fails_without_sensor() {
        let (enumerator, _hub) = ipu3_enumerator(&[]);
        let dispatcher = Arc::new(EventDispatcher::new());
        let mut handler = Ipu3Pipeline::new(dispatcher);
        let mut registrar = CameraRegistrar::new();
        assert!(!handler.match_devices(&enumerator, &mut registrar));

        // A failed match releases the media devices for other handlers.
        assert!(enumerator.devices().iter().all(|dev| !dev.busy()));
    }

    #[test]
    fn test_second_handler_finds_devices_busy() {
        let (mut handler, mut registrar, enumerator) = handler_with_sensor();
        assert!(handler.match_devices(&enumerator, &mut registrar));

        let dispatcher = Arc::new(EventDispatcher::new());
        let mut second = Ipu3Pipeline::new(dispatcher);
        let mut second_registrar = CameraRegistrar::new();
        assert!(!second.match_devices(&enumerator, &mut second_registrar));
        assert!(second_registrar.take().is_empty());
    }

    #[test]
    fn test_sensor_link_enabled_after_registration() {
        let (mut handler, mut registrar, enumerator) = handler_with_sensor();
        assert!(handler.match_devices(&enumerator, &mut registrar));

        let cio2 = &enumerator.devices()[0];
        cio2.with_topology(|topo| {
            let sensor = topo.entity_by_name("imx219").unwrap();
            let pad = topo.entity(sensor).pads[0];
            let link = topo.link(topo.pad(pad).links[0]);
            assert!(link.enabled);
        });
    }

    #[test]
    fn test_configure_picks_smallest_enclosing_size() {
        let (mut handler, mut registrar, enumerator) = handler_with_sensor();
        assert!(handler.match_devices(&enumerator, &mut registrar));

        let cfg = StreamConfiguration {
            width: 1280,
            height: 720,
            pixel_format: FourCC::IPU3_SGRBG10,
            buffer_count: 4,
        };
        handler.configure(0, &[cfg]).unwrap();

        // The sensor ladder holds 1280x720 exactly; larger candidates lose.
        let sensor_format = handler.cameras[0].cio2.sensor.get_format(0).unwrap();
        assert_eq!(sensor_format.size, Size::new(1280, 720));
        assert_eq!(sensor_format.mbus_code, MEDIA_BUS_FMT_SGRBG10_1X10);

        let cio2_format = handler.cameras[0].cio2.output.get_format().unwrap();
        assert_eq!(cio2_format.fourcc, FourCC::IPU3_SGRBG10);
        assert_eq!(cio2_format.size, Size::new(1280, 720));
    }

    #[test]
    fn test_configure_rejects_bad_alignment() {
        let (mut handler, mut registrar, enumerator) = handler_with_sensor();
        assert!(handler.match_devices(&enumerator, &mut registrar));

        let cfg = StreamConfiguration {
            width: 10,
            height: 4,
            pixel_format: FourCC::IPU3_SGRBG10,
            buffer_count: 4,
        };
        assert!(matches!(handler.configure(0, &[cfg]), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_configure_rejects_oversize() {
        let (mut handler, mut registrar, enumerator) = handler_with_sensor();
        assert!(handler.match_devices(&enumerator, &mut registrar));

        let cfg = StreamConfiguration {
            width: 3264 + 8,
            height: 2448,
            pixel_format: FourCC::IPU3_SGRBG10,
            buffer_count: 4,
        };
        assert!(matches!(handler.configure(0, &[cfg]), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_allocate_rejects_zero_buffers() {
        let (mut handler, mut registrar, enumerator) = handler_with_sensor();
        assert!(handler.match_devices(&enumerator, &mut registrar));

        let cfg = StreamConfiguration {
            width: 1280,
            height: 720,
            pixel_format: FourCC::IPU3_SGRBG10,
            buffer_count: 0,
        };
        handler.configure(0, &[cfg]).unwrap();
        assert!(matches!(handler.allocate_buffers(0), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_queue_request_without_buffer_is_no_entry() {
        let (mut handler, mut registrar, enumerator) = handler_with_sensor();
        assert!(handler.match_devices(&enumerator, &mut registrar));

        let cfg = StreamConfiguration {
            width: 1280,
            height: 720,
            pixel_format: FourCC::IPU3_SGRBG10,
            buffer_count: 4,
        };
        handler.configure(0, &[cfg]).unwrap();
        handler.allocate_buffers(0).unwrap();

        let request = Request::new(1);
        assert!(matches!(handler.queue_request(0, request), Err(Error::NoEntry)));
    }
}
