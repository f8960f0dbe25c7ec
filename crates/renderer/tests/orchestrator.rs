use renderer::{
    AdaptationSettings, Camera, FrameOutcome, LuminanceSample, PassInput, PassInvocation, PassOutput, PipelineMode,
    PipelineSelection, PresentationDevice, PresenterState, Readback, RenderBackend, RenderError,
    RenderOrchestrator, RenderResult, RenderTarget, RendererConfig, SampleRequest, Scene,
    SceneProvider, SessionEvent, SessionEventSink, SkipReason, SurfaceDescriptor, SurfaceSize,
    TargetDescriptor, TargetFormat, ToneMapStrategy, Viewport,
};
use renderer::{Eye, EyePose, EyeView};

use glam::Mat4;

const DELTA: f32 = 0.016;

struct RecordingTarget {
    id: usize,
    size: SurfaceSize,
    format: TargetFormat,
}

impl RenderTarget for RecordingTarget {
    fn size(&self) -> SurfaceSize {
        self.size
    }

    fn format(&self) -> TargetFormat {
        self.format
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Encoded {
    pipeline: String,
    pass: String,
    reads_scene: bool,
    to_surface: bool,
    viewport: Viewport,
    clears: bool,
    delta: f32,
    exposure: f32,
}

#[derive(Default)]
struct RecordingBackend {
    size: SurfaceSize,
    configured: usize,
    allocations: usize,
    /// Upcoming allocations that come back at the wrong size.
    stale_allocations: usize,
    fail_configure: bool,
    lose_next_frame: bool,
    fail_capture: bool,
    luminance: Option<[u8; 3]>,
    /// Only every n-th capture completes; the others are still in flight.
    capture_every: usize,
    captures: usize,
    sample_regions: Vec<Viewport>,
    frames_begun: usize,
    frames_finished: usize,
    encoded: Vec<Encoded>,
}

impl RecordingBackend {
    fn scene_passes(&self) -> Vec<&Encoded> {
        self.encoded
            .iter()
            .filter(|pass| pass.reads_scene)
            .collect()
    }
}

impl RenderBackend for RecordingBackend {
    type Target = RecordingTarget;

    fn surface_size(&self) -> SurfaceSize {
        self.size
    }

    fn configure_surface(&mut self, size: SurfaceSize) -> RenderResult<()> {
        if self.fail_configure {
            return Err(RenderError::SurfaceUnavailable("no display".into()));
        }
        self.configured += 1;
        self.size = size;
        Ok(())
    }

    fn create_target(&mut self, descriptor: &TargetDescriptor) -> RenderResult<RecordingTarget> {
        self.allocations += 1;
        let size = if self.stale_allocations > 0 {
            self.stale_allocations -= 1;
            SurfaceSize::new(descriptor.size.width / 2, descriptor.size.height / 2)
        } else {
            descriptor.size
        };
        Ok(RecordingTarget {
            id: self.allocations,
            size,
            format: descriptor.format,
        })
    }

    fn begin_frame(&mut self) -> RenderResult<()> {
        if std::mem::take(&mut self.lose_next_frame) {
            return Err(RenderError::SurfaceLost);
        }
        self.frames_begun += 1;
        Ok(())
    }

    fn encode_pass(&mut self, invocation: &PassInvocation<'_, RecordingTarget>) -> RenderResult<()> {
        if let PassInput::Target(target) = &invocation.input {
            assert!(target.id > 0);
        }
        self.encoded.push(Encoded {
            pipeline: invocation.pipeline.to_string(),
            pass: invocation.pass.name().to_string(),
            reads_scene: matches!(invocation.input, PassInput::Scene { .. }),
            to_surface: matches!(invocation.output, PassOutput::Surface),
            viewport: invocation.viewport,
            clears: invocation.clear.is_some(),
            delta: invocation.delta,
            exposure: invocation.exposure,
        });
        Ok(())
    }

    fn capture(&mut self, request: &SampleRequest) -> RenderResult<Option<Readback>> {
        self.sample_regions.push(request.region);
        if self.fail_capture {
            return Err(RenderError::SampleReadbackFailure("map failed".into()));
        }
        self.captures += 1;
        if self.capture_every > 1 && self.captures % self.capture_every != 0 {
            return Ok(None);
        }
        self.luminance
            .map(|rgb| LuminanceSample::uniform(request.grid, rgb).map(Readback::Sample))
            .transpose()
    }

    fn finish_frame(&mut self) -> RenderResult<()> {
        self.frames_finished += 1;
        Ok(())
    }
}

struct TestRoom {
    scene: Scene,
    camera: Camera,
    ready: bool,
}

impl SceneProvider for TestRoom {
    fn scene(&self) -> &Scene {
        &self.scene
    }

    fn camera(&self) -> &Camera {
        &self.camera
    }

    fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

/// Two-eye headset splitting the surface into halves.
#[derive(Default)]
struct ScriptedHeadset {
    presenting: bool,
    disconnected: bool,
    sink: Option<SessionEventSink>,
    eye_queries: usize,
}

impl ScriptedHeadset {
    fn emit(&self, event: SessionEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    fn unplug(&mut self) {
        self.disconnected = true;
        self.presenting = false;
        self.emit(SessionEvent::DeviceDisconnected);
    }
}

impl PresentationDevice for ScriptedHeadset {
    fn subscribe(&mut self, sink: SessionEventSink) {
        self.sink = Some(sink);
    }

    fn is_connected(&self) -> bool {
        !self.disconnected
    }

    fn request_session(&mut self) -> RenderResult<()> {
        self.presenting = true;
        self.emit(SessionEvent::SessionStarted);
        Ok(())
    }

    fn end_session(&mut self) -> RenderResult<()> {
        self.presenting = false;
        self.emit(SessionEvent::SessionEnded);
        Ok(())
    }

    fn is_presenting(&self) -> bool {
        self.presenting
    }

    fn eyes(&mut self, surface: SurfaceSize) -> Vec<EyeView> {
        self.eye_queries += 1;
        let half = surface.width / 2;
        // Reported right-first to check the presenter orders them.
        [(Eye::Right, half), (Eye::Left, 0)]
            .into_iter()
            .map(|(eye, x)| EyeView {
                eye,
                viewport: Viewport::new(x, 0, half, surface.height),
                pose: EyePose::default(),
                projection: Mat4::IDENTITY,
            })
            .collect()
    }
}

type Harness = RenderOrchestrator<RecordingBackend, TestRoom, ScriptedHeadset>;

fn composited_config() -> RendererConfig {
    RendererConfig {
        pipelines: PipelineSelection {
            flat: PipelineMode::Composited,
            stereo: PipelineMode::Direct,
            keep_warm: false,
        },
        ..RendererConfig::default()
    }
}

fn warm_adaptive_config() -> RendererConfig {
    RendererConfig {
        pipelines: PipelineSelection {
            flat: PipelineMode::Direct,
            stereo: PipelineMode::Direct,
            keep_warm: true,
        },
        tone_mapping: ToneMapStrategy::Adaptive(AdaptationSettings::default()),
        ..RendererConfig::default()
    }
}

fn harness_with(config: &RendererConfig, backend: RecordingBackend) -> RenderResult<Harness> {
    let room = TestRoom {
        scene: Scene::new(),
        camera: Camera::default(),
        ready: true,
    };
    RenderOrchestrator::initialize(
        backend,
        SurfaceDescriptor::new(800, 600),
        room,
        ScriptedHeadset::default(),
        config,
    )
}

fn harness(config: &RendererConfig) -> Harness {
    harness_with(config, RecordingBackend::default()).expect("orchestrator initialises")
}

fn start_session(orchestrator: &mut Harness) {
    orchestrator.toggle_session().expect("session requested");
    orchestrator.update(DELTA).expect("frame renders");
    assert!(matches!(
        orchestrator.presenter_state(),
        PresenterState::Presenting { .. }
    ));
}

#[test]
fn resizing_to_the_current_size_reallocates_nothing() {
    let mut orchestrator = harness(&composited_config());
    assert_eq!(orchestrator.backend().allocations, 2);

    orchestrator.resize(800, 600).expect("resize");
    assert_eq!(orchestrator.backend().allocations, 2);

    orchestrator.resize(1024, 768).expect("resize");
    orchestrator.resize(1024, 768).expect("resize");
    assert_eq!(orchestrator.backend().allocations, 4);
    assert_eq!(orchestrator.surface().size(), SurfaceSize::new(1024, 768));
}

#[test]
fn zero_sized_resize_is_ignored() {
    let mut orchestrator = harness(&composited_config());
    let configured = orchestrator.backend().configured;
    orchestrator.resize(0, 600).expect("resize");
    assert_eq!(orchestrator.backend().configured, configured);
    assert_eq!(orchestrator.surface().size(), SurfaceSize::new(800, 600));
}

#[test]
fn pixel_ratio_changes_resize_targets() {
    let mut orchestrator = harness(&composited_config());
    orchestrator.set_pixel_ratio(2.0).expect("pixel ratio");
    assert_eq!(orchestrator.surface().size(), SurfaceSize::new(1600, 1200));
    assert_eq!(orchestrator.backend().size, SurfaceSize::new(1600, 1200));
    assert_eq!(orchestrator.backend().allocations, 4);

    // Capped at 2, so nothing changes.
    orchestrator.set_pixel_ratio(3.0).expect("pixel ratio");
    assert_eq!(orchestrator.backend().allocations, 4);
}

#[test]
fn rejected_resize_keeps_rendering_at_the_previous_size() {
    let mut orchestrator = harness(&composited_config());
    orchestrator.backend_mut().fail_configure = true;

    assert!(matches!(
        orchestrator.resize(1024, 768),
        Err(RenderError::SurfaceUnavailable(_))
    ));
    assert_eq!(orchestrator.surface().size(), SurfaceSize::new(800, 600));
    assert_eq!(orchestrator.backend().size, SurfaceSize::new(800, 600));
    assert_eq!(orchestrator.backend().allocations, 2);
    assert_eq!(
        orchestrator.update(DELTA).expect("frame"),
        FrameOutcome::Presented { eyes: 1 }
    );

    orchestrator.backend_mut().fail_configure = false;
    orchestrator.resize(1024, 768).expect("resize");
    assert_eq!(orchestrator.surface().size(), SurfaceSize::new(1024, 768));
    assert_eq!(orchestrator.backend().allocations, 4);
}

#[test]
fn failed_reconfiguration_skips_the_frame() {
    let mut orchestrator = harness(&composited_config());
    let backend = orchestrator.backend_mut();
    backend.size = SurfaceSize::new(640, 480);
    backend.fail_configure = true;

    assert_eq!(
        orchestrator.update(DELTA).expect("frame"),
        FrameOutcome::Skipped(SkipReason::SurfaceLost)
    );
    assert_eq!(orchestrator.backend().frames_begun, 0);

    orchestrator.backend_mut().fail_configure = false;
    assert_eq!(
        orchestrator.update(DELTA).expect("frame"),
        FrameOutcome::Presented { eyes: 1 }
    );
    assert_eq!(orchestrator.backend().size, SurfaceSize::new(800, 600));
}

#[test]
fn flat_frame_routes_composited_passes_to_the_surface() {
    let mut orchestrator = harness(&composited_config());
    let outcome = orchestrator.update(DELTA).expect("frame");
    assert_eq!(outcome, FrameOutcome::Presented { eyes: 1 });

    let passes: Vec<_> = orchestrator
        .backend()
        .encoded
        .iter()
        .map(|pass| (pass.pass.as_str(), pass.to_surface))
        .collect();
    assert_eq!(
        passes,
        vec![
            ("scene", false),
            ("tone-map", false),
            ("output-encoding", true)
        ]
    );
    assert_eq!(orchestrator.backend().frames_finished, 1);
}

#[test]
fn scene_not_ready_skips_without_touching_the_backend() {
    let mut orchestrator = harness(&RendererConfig::default());
    orchestrator.provider_mut().ready = false;

    let outcome = orchestrator.update(DELTA).expect("frame");
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::SceneNotReady));
    assert_eq!(orchestrator.backend().frames_begun, 0);
    assert!(orchestrator.backend().encoded.is_empty());
    assert_eq!(orchestrator.exposure(), 1.3);

    orchestrator.provider_mut().ready = true;
    assert_eq!(
        orchestrator.update(DELTA).expect("frame"),
        FrameOutcome::Presented { eyes: 1 }
    );
}

#[test]
fn frames_render_with_the_previous_exposure() {
    let mut orchestrator = harness(&RendererConfig::default());
    orchestrator.backend_mut().luminance = Some([0, 0, 0]);

    orchestrator.update(DELTA).expect("first frame");
    let raised = orchestrator.exposure();
    assert!(raised > 1.3);
    assert!(raised <= 1.3 * 1.1 + 1e-5);

    orchestrator.update(DELTA).expect("second frame");
    let exposures: Vec<f32> = orchestrator
        .backend()
        .encoded
        .iter()
        .map(|pass| pass.exposure)
        .collect();
    assert_eq!(exposures, vec![1.3, raised]);
}

#[test]
fn bright_frames_lower_exposure() {
    let mut orchestrator = harness(&RendererConfig::default());
    orchestrator.backend_mut().luminance = Some([255, 255, 255]);
    orchestrator.update(DELTA).expect("frame");
    assert!(orchestrator.exposure() < 1.3);
    let state = orchestrator.exposure_state();
    assert!(state.average_luminance.is_some_and(|avg| avg > 0.99));
}

fn dark_exposure_after(capture_every: usize, frames: usize) -> f32 {
    let backend = RecordingBackend {
        luminance: Some([0, 0, 0]),
        capture_every,
        ..RecordingBackend::default()
    };
    let mut orchestrator =
        harness_with(&RendererConfig::default(), backend).expect("orchestrator initialises");
    for _ in 0..frames {
        orchestrator.update(1.0 / 60.0).expect("frame");
    }
    orchestrator.exposure()
}

#[test]
fn in_flight_captures_do_not_slow_adaptation() {
    let every_frame = dark_exposure_after(1, 60);
    let alternate_frames = dark_exposure_after(2, 60);
    assert!(every_frame > 2.0, "got {every_frame}");
    assert!(
        (every_frame - alternate_frames).abs() / every_frame < 0.01,
        "every frame {every_frame}, alternate frames {alternate_frames}"
    );
}

#[test]
fn readback_failure_keeps_exposure() {
    let mut orchestrator = harness(&RendererConfig::default());
    orchestrator.backend_mut().fail_capture = true;

    for _ in 0..3 {
        let outcome = orchestrator.update(DELTA).expect("frame still presents");
        assert_eq!(outcome, FrameOutcome::Presented { eyes: 1 });
    }
    assert_eq!(orchestrator.exposure(), 1.3);
    assert_eq!(orchestrator.exposure_state().average_luminance, None);
}

#[test]
fn stale_targets_are_recreated_before_rendering() {
    let mut orchestrator = harness(&composited_config());
    orchestrator.backend_mut().stale_allocations = 2;
    orchestrator.resize(1024, 768).expect("resize");
    assert_eq!(orchestrator.backend().allocations, 4);

    let outcome = orchestrator.update(DELTA).expect("frame");
    assert_eq!(outcome, FrameOutcome::Presented { eyes: 1 });
    assert_eq!(orchestrator.backend().allocations, 6);
}

#[test]
fn persistently_stale_targets_skip_the_frame() {
    let mut orchestrator = harness(&composited_config());
    orchestrator.backend_mut().stale_allocations = usize::MAX;
    orchestrator.resize(1024, 768).expect("resize");

    let outcome = orchestrator.update(DELTA).expect("frame");
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::InvalidTargets));
    assert!(orchestrator.backend().encoded.is_empty());
    assert_eq!(orchestrator.frame_stats().skipped, 1);
}

#[test]
fn lost_surface_is_reconfigured_and_the_frame_skipped() {
    let mut orchestrator = harness(&RendererConfig::default());
    let configured = orchestrator.backend().configured;
    orchestrator.backend_mut().lose_next_frame = true;

    let outcome = orchestrator.update(DELTA).expect("frame");
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::SurfaceLost));
    assert_eq!(orchestrator.backend().configured, configured + 1);

    assert_eq!(
        orchestrator.update(DELTA).expect("frame"),
        FrameOutcome::Presented { eyes: 1 }
    );
}

#[test]
fn unavailable_surface_fails_initialization() {
    let backend = RecordingBackend {
        fail_configure: true,
        ..RecordingBackend::default()
    };
    let result = harness_with(&RendererConfig::default(), backend);
    assert!(matches!(result, Err(RenderError::SurfaceUnavailable(_))));
}

#[test]
fn invalid_settings_fail_initialization() {
    let mut config = RendererConfig::default();
    config.exposure.min = 4.0;
    let result = harness_with(&config, RecordingBackend::default());
    assert!(matches!(result, Err(RenderError::InvalidConfig(_))));
}

#[test]
fn stereo_frames_restore_the_full_viewport() {
    let mut orchestrator = harness(&RendererConfig::default());
    start_session(&mut orchestrator);

    let full = Viewport::full(SurfaceSize::new(800, 600));
    for _ in 0..5 {
        let outcome = orchestrator.update(DELTA).expect("stereo frame");
        assert_eq!(outcome, FrameOutcome::Presented { eyes: 2 });
        assert_eq!(orchestrator.surface().viewport(), full);
    }
    assert_eq!(
        orchestrator.presenter_state(),
        PresenterState::Presenting { frames: 6 }
    );
    assert_eq!(orchestrator.device().eye_queries, 6);
}

#[test]
fn later_eyes_neither_clear_nor_advance_time() {
    let mut orchestrator = harness(&RendererConfig::default());
    start_session(&mut orchestrator);
    orchestrator.backend_mut().encoded.clear();

    orchestrator.update(DELTA).expect("stereo frame");
    let scene_passes = orchestrator.backend().scene_passes();
    assert_eq!(scene_passes.len(), 2);

    let (left, right) = (scene_passes[0], scene_passes[1]);
    assert_eq!(left.viewport, Viewport::new(0, 0, 400, 600));
    assert!(left.clears);
    assert_eq!(left.delta, DELTA);
    assert_eq!(right.viewport, Viewport::new(400, 0, 400, 600));
    assert!(!right.clears);
    assert_eq!(right.delta, 0.0);
    assert!(scene_passes.iter().all(|pass| pass.pipeline == "direct"));
}

#[test]
fn stereo_samples_the_first_eye() {
    let mut orchestrator = harness(&RendererConfig::default());
    orchestrator.update(DELTA).expect("flat frame");
    start_session(&mut orchestrator);

    let regions = &orchestrator.backend().sample_regions;
    assert_eq!(regions[0], Viewport::new(0, 0, 800, 600));
    assert_eq!(regions[1], Viewport::new(0, 0, 400, 600));
}

#[test]
fn warm_pipeline_never_reaches_the_surface() {
    let mut orchestrator = harness(&warm_adaptive_config());
    assert_eq!(orchestrator.backend().allocations, 2);

    orchestrator.update(DELTA).expect("flat frame");
    let encoded = &orchestrator.backend().encoded;
    let surface_writes: Vec<_> = encoded.iter().filter(|pass| pass.to_surface).collect();
    assert_eq!(surface_writes.len(), 1);
    assert_eq!(surface_writes[0].pipeline, "direct");
    let warm: Vec<_> = encoded
        .iter()
        .filter(|pass| pass.pipeline == "composited")
        .map(|pass| (pass.pass.as_str(), pass.to_surface))
        .collect();
    assert_eq!(warm, vec![("scene", false), ("tone-map", false)]);

    start_session(&mut orchestrator);
    orchestrator.backend_mut().encoded.clear();
    orchestrator.update(DELTA).expect("stereo frame");
    let encoded = &orchestrator.backend().encoded;
    let eye_viewports: Vec<_> = encoded
        .iter()
        .filter(|pass| pass.to_surface)
        .map(|pass| pass.viewport)
        .collect();
    assert_eq!(
        eye_viewports,
        vec![Viewport::new(0, 0, 400, 600), Viewport::new(400, 0, 400, 600)]
    );
    let warm: Vec<_> = encoded
        .iter()
        .filter(|pass| pass.pipeline == "composited")
        .collect();
    assert_eq!(warm.len(), 2);
    assert!(warm.iter().all(|pass| !pass.to_surface && pass.delta == DELTA));
}

#[test]
fn unplugging_mid_session_falls_back_to_flat() {
    let mut orchestrator = harness(&RendererConfig::default());
    start_session(&mut orchestrator);

    orchestrator.device_mut().unplug();
    let outcome = orchestrator.update(DELTA).expect("frame");
    assert_eq!(outcome, FrameOutcome::Presented { eyes: 1 });
    assert_eq!(orchestrator.presenter_state(), PresenterState::Inactive);
    assert_eq!(
        orchestrator.surface().viewport(),
        Viewport::full(SurfaceSize::new(800, 600))
    );
}

#[test]
fn toggling_twice_ends_the_session() {
    let mut orchestrator = harness(&RendererConfig::default());
    start_session(&mut orchestrator);

    orchestrator.toggle_session().expect("session ended");
    let outcome = orchestrator.update(DELTA).expect("frame");
    assert_eq!(outcome, FrameOutcome::Presented { eyes: 1 });
    assert_eq!(orchestrator.presenter_state(), PresenterState::Inactive);
}

#[test]
fn ending_an_inactive_session_is_a_no_op() {
    let mut orchestrator = harness(&RendererConfig::default());
    orchestrator.on_session_end().expect("no-op");
    assert_eq!(orchestrator.presenter_state(), PresenterState::Inactive);
}
