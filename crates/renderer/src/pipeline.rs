//! Ordered render passes with ping-pong offscreen targets.
//!
//! Routing works like a classic effect composer: the scene pass fills the
//! read target, every later pass reads the read target and writes the write
//! target before the two swap, and the last enabled pass writes the surface.

use crate::backend::{PassInput, PassInvocation, PassOutput, RenderBackend, RenderTarget, TargetDescriptor};
use crate::camera::Camera;
use crate::error::{RenderError, RenderResult};
use crate::scene::Scene;
use crate::types::{
    OutputEncoding, PipelineMode, PipelineSelection, RendererConfig, SurfaceSize, TargetFormat,
    ToneMapStrategy, Viewport,
};

/// Work performed by a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PassOp {
    /// Draws the scene. With `inline` set, exposure and that encoding are
    /// applied in the same shader and no tone-mapping pass is needed.
    Scene { inline: Option<OutputEncoding> },
    ToneMap(ToneMapStrategy),
    Encode(OutputEncoding),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pass {
    name: String,
    op: PassOp,
    enabled: bool,
}

impl Pass {
    pub fn new(name: impl Into<String>, op: PassOp) -> Self {
        Self {
            name: name.into(),
            op,
            enabled: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &PassOp {
        &self.op
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn needs_swap(&self) -> bool {
        !matches!(self.op, PassOp::Scene { .. })
    }

    /// Stateful passes carry data from frame to frame (adapted luminance).
    pub fn is_stateful(&self) -> bool {
        matches!(self.op, PassOp::ToneMap(ToneMapStrategy::Adaptive(_)))
    }
}

/// Per-run inputs shared by every pass.
#[derive(Debug, Clone, Copy)]
pub struct PassRun<'a> {
    pub scene: &'a Scene,
    pub camera: &'a Camera,
    pub viewport: Viewport,
    pub surface_size: SurfaceSize,
    pub clear: Option<[f32; 4]>,
    pub exposure: f32,
    pub delta: f32,
}

pub struct PassPipeline<T> {
    label: String,
    mode: PipelineMode,
    passes: Vec<Pass>,
    format: TargetFormat,
    targets: Option<[T; 2]>,
    size: SurfaceSize,
    allocations: u64,
}

impl<T: RenderTarget> PassPipeline<T> {
    pub fn new(
        label: impl Into<String>,
        mode: PipelineMode,
        format: TargetFormat,
        passes: Vec<Pass>,
    ) -> RenderResult<Self> {
        let label = label.into();
        match passes.first() {
            None => {
                return Err(RenderError::InvalidPipeline(format!(
                    "pipeline '{label}' has no passes"
                )))
            }
            Some(first) if !matches!(first.op, PassOp::Scene { .. }) => {
                return Err(RenderError::InvalidPipeline(format!(
                    "pipeline '{label}' must start with a scene pass, found '{}'",
                    first.name
                )))
            }
            Some(_) => {}
        }
        if passes
            .iter()
            .skip(1)
            .any(|pass| matches!(pass.op, PassOp::Scene { .. }))
        {
            return Err(RenderError::InvalidPipeline(format!(
                "pipeline '{label}' renders the scene more than once"
            )));
        }
        Ok(Self {
            label,
            mode,
            passes,
            format,
            targets: None,
            size: SurfaceSize::default(),
            allocations: 0,
        })
    }

    /// Scene straight to the surface with inline linear tone mapping.
    pub fn direct(encoding: OutputEncoding) -> RenderResult<Self> {
        Self::new(
            "direct",
            PipelineMode::Direct,
            TargetFormat::Standard,
            vec![Pass::new("scene", PassOp::Scene { inline: Some(encoding) })],
        )
    }

    /// Scene, tone mapping and output encoding over extended-range targets.
    pub fn composited(strategy: ToneMapStrategy, encoding: OutputEncoding) -> RenderResult<Self> {
        Self::new(
            "composited",
            PipelineMode::Composited,
            TargetFormat::Extended,
            vec![
                Pass::new("scene", PassOp::Scene { inline: None }),
                Pass::new("tone-map", PassOp::ToneMap(strategy)),
                Pass::new("output-encoding", PassOp::Encode(encoding)),
            ],
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    /// Number of targets created over the pipeline's lifetime.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> RenderResult<()> {
        let index = self
            .passes
            .iter()
            .position(|pass| pass.name == name)
            .ok_or_else(|| {
                RenderError::InvalidPipeline(format!("no pass '{name}' in '{}'", self.label))
            })?;
        if index == 0 && !enabled {
            return Err(RenderError::InvalidPipeline(format!(
                "the scene pass of '{}' cannot be disabled",
                self.label
            )));
        }
        self.passes[index].enabled = enabled;
        Ok(())
    }

    /// The single pass that writes the surface during `run`.
    pub fn surface_writer(&self) -> Option<&Pass> {
        self.passes.iter().filter(|pass| pass.enabled).last()
    }

    fn enabled_count(&self) -> usize {
        self.passes.iter().filter(|pass| pass.enabled).count()
    }

    fn needs_targets(&self) -> bool {
        self.enabled_count() > 1 || self.passes.iter().any(Pass::is_stateful)
    }

    fn targets_match(&self, size: SurfaceSize) -> bool {
        if !self.needs_targets() {
            return true;
        }
        self.targets
            .as_ref()
            .is_some_and(|targets| targets.iter().all(|target| target.size() == size))
    }

    /// Recreates targets for a new surface size. Unchanged sizes are a no-op;
    /// returns whether anything was rebuilt.
    pub fn resize<B>(&mut self, backend: &mut B, size: SurfaceSize) -> RenderResult<bool>
    where
        B: RenderBackend<Target = T>,
    {
        if size.is_empty() || (size == self.size && self.targets_match(size)) {
            return Ok(false);
        }
        self.recreate(backend, size)?;
        Ok(true)
    }

    /// Unconditionally rebuilds targets and re-notifies every pass.
    pub fn recreate<B>(&mut self, backend: &mut B, size: SurfaceSize) -> RenderResult<()>
    where
        B: RenderBackend<Target = T>,
    {
        if self.needs_targets() {
            let mut create = |slot: &str| {
                backend.create_target(&TargetDescriptor {
                    label: format!("{} target {slot}", self.label),
                    size,
                    format: self.format,
                })
            };
            let first = create("a")?;
            let second = create("b")?;
            self.targets = Some([first, second]);
            self.allocations += 2;
        }
        self.size = size;
        for pass in &self.passes {
            backend.pass_resized(&self.label, pass, size);
        }
        tracing::debug!(
            pipeline = %self.label,
            width = size.width,
            height = size.height,
            allocations = self.allocations,
            "pipeline targets recreated"
        );
        Ok(())
    }

    /// Fails with `InvalidTargetSize` unless every target matches `surface`.
    pub fn validate(&self, surface: SurfaceSize) -> RenderResult<()> {
        if !self.needs_targets() {
            return Ok(());
        }
        let Some(targets) = &self.targets else {
            return Err(RenderError::InvalidTargetSize {
                expected: surface,
                actual: self.size,
            });
        };
        match targets.iter().find(|target| target.size() != surface) {
            Some(stale) => Err(RenderError::InvalidTargetSize {
                expected: surface,
                actual: stale.size(),
            }),
            None => Ok(()),
        }
    }

    /// Encodes every enabled pass; the last one writes the surface viewport.
    pub fn run<B>(&self, backend: &mut B, run: &PassRun<'_>) -> RenderResult<()>
    where
        B: RenderBackend<Target = T>,
    {
        self.validate(run.surface_size)?;
        self.encode(backend, run, self.enabled_count(), true)
    }

    /// Runs passes up to the last stateful one without touching the surface.
    /// Returns whether anything was encoded.
    pub fn warm<B>(&self, backend: &mut B, run: &PassRun<'_>) -> RenderResult<bool>
    where
        B: RenderBackend<Target = T>,
    {
        let enabled: Vec<&Pass> = self.passes.iter().filter(|pass| pass.enabled).collect();
        let Some(last_stateful) = enabled.iter().rposition(|pass| pass.is_stateful()) else {
            return Ok(false);
        };
        self.validate(run.surface_size)?;
        self.encode(backend, run, last_stateful + 1, false)?;
        Ok(true)
    }

    fn target(&self, index: usize) -> RenderResult<&T> {
        self.targets
            .as_ref()
            .map(|targets| &targets[index])
            .ok_or(RenderError::InvalidTargetSize {
                expected: self.size,
                actual: SurfaceSize::default(),
            })
    }

    fn encode<B>(&self, backend: &mut B, run: &PassRun<'_>, count: usize, to_surface: bool) -> RenderResult<()>
    where
        B: RenderBackend<Target = T>,
    {
        let enabled: Vec<&Pass> = self
            .passes
            .iter()
            .filter(|pass| pass.enabled)
            .take(count)
            .collect();
        let last = enabled.len().saturating_sub(1);
        let mut read = 0;

        for (index, pass) in enabled.iter().enumerate() {
            let writes_surface = to_surface && index == last;
            let input = if index == 0 {
                PassInput::Scene {
                    scene: run.scene,
                    camera: run.camera,
                }
            } else {
                PassInput::Target(self.target(read)?)
            };
            let output = if writes_surface {
                PassOutput::Surface
            } else if index == 0 {
                PassOutput::Target(self.target(read)?)
            } else {
                PassOutput::Target(self.target(1 - read)?)
            };

            backend.encode_pass(&PassInvocation {
                pipeline: &self.label,
                pass,
                input,
                output,
                viewport: run.viewport,
                clear: run.clear,
                exposure: run.exposure,
                delta: run.delta,
            })?;

            if index > 0 && pass.needs_swap() && !writes_surface {
                read = 1 - read;
            }
        }
        Ok(())
    }
}

/// Both pipeline instances plus the selection made at initialization.
pub struct PipelineSet<T> {
    direct: PassPipeline<T>,
    composited: PassPipeline<T>,
    selection: PipelineSelection,
}

impl<T: RenderTarget> PipelineSet<T> {
    pub fn new(config: &RendererConfig) -> RenderResult<Self> {
        Ok(Self {
            direct: PassPipeline::direct(config.direct_encoding)?,
            composited: PassPipeline::composited(config.tone_mapping, config.composited_encoding)?,
            selection: config.pipelines,
        })
    }

    pub fn selection(&self) -> PipelineSelection {
        self.selection
    }

    pub fn get(&self, mode: PipelineMode) -> &PassPipeline<T> {
        match mode {
            PipelineMode::Direct => &self.direct,
            PipelineMode::Composited => &self.composited,
        }
    }

    pub fn get_mut(&mut self, mode: PipelineMode) -> &mut PassPipeline<T> {
        match mode {
            PipelineMode::Direct => &mut self.direct,
            PipelineMode::Composited => &mut self.composited,
        }
    }

    /// Pipeline producing presented frames for the given presentation mode.
    pub fn presenting(&self, stereo: bool) -> &PassPipeline<T> {
        self.get(self.selection.mode(stereo))
    }

    /// Pipelines that need live targets: selected ones, or all when kept warm.
    fn in_use(&self) -> impl Iterator<Item = PipelineMode> + '_ {
        [PipelineMode::Direct, PipelineMode::Composited]
            .into_iter()
            .filter(move |mode| {
                self.selection.keep_warm
                    || self.selection.flat == *mode
                    || self.selection.stereo == *mode
            })
    }

    pub fn resize<B>(&mut self, backend: &mut B, size: SurfaceSize) -> RenderResult<bool>
    where
        B: RenderBackend<Target = T>,
    {
        let modes: Vec<_> = self.in_use().collect();
        let mut changed = false;
        for mode in modes {
            changed |= self.get_mut(mode).resize(backend, size)?;
        }
        Ok(changed)
    }

    pub fn recreate<B>(&mut self, backend: &mut B, size: SurfaceSize) -> RenderResult<()>
    where
        B: RenderBackend<Target = T>,
    {
        let modes: Vec<_> = self.in_use().collect();
        for mode in modes {
            self.get_mut(mode).recreate(backend, size)?;
        }
        Ok(())
    }

    pub fn validate(&self, size: SurfaceSize) -> RenderResult<()> {
        self.in_use().try_for_each(|mode| self.get(mode).validate(size))
    }

    pub fn allocations(&self) -> u64 {
        self.direct.allocations() + self.composited.allocations()
    }

    /// Advances the stateful passes of the pipelines not presenting this frame.
    pub fn warm_others<B>(&self, backend: &mut B, presented: PipelineMode, run: &PassRun<'_>) -> RenderResult<()>
    where
        B: RenderBackend<Target = T>,
    {
        if !self.selection.keep_warm {
            return Ok(());
        }
        for mode in self.in_use().filter(|mode| *mode != presented) {
            self.get(mode).warm(backend, run)?;
        }
        Ok(())
    }
}
