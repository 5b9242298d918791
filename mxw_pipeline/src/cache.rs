//! Pipeline lookup by content hash with a persistent cache of program environments.
//!
//! Pipelines are identified by the hashes of their programs and the fixed function state
//! that affects code generation, so the same programs at different addresses share pipelines.
//! Each newly built pipeline is appended to the title's cache file.
//! Loading the file at startup rebuilds every recorded pipeline without reading guest memory.
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use log::{debug, error, info, warn};
use mxw_lib::cache::{PipelineCacheFile, PipelineKind, PipelineRecord};
use mxw_lib::environment::EnvironmentBlob;
use mxw_lib::key::{ComputePipelineKey, GraphicsPipelineKey, NUM_PROGRAMS};
use mxw_shader::environment::{Environment, FileEnvironment};

use crate::config::PipelineCacheConfig;
use crate::device::Device;
use crate::environment::{ComputeEnvironment, GraphicsEnvironment, GuestMemory};
use crate::error::{LoadDiskCacheError, PipelineError};
use crate::pipeline::{
    build_compute_pipeline, build_graphics_pipeline, CompileOptions, ComputePipeline,
    GraphicsPipeline,
};
use crate::state::{ComputeState, GraphicsState, PROGRAM_STAGES};
use crate::workers::{StatefulWorkerPool, StopToken};

/// The progress reported while loading the disk cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    /// Reading the cache file.
    Prepare,
    /// Building recorded pipelines.
    Build,
    Complete,
}

/// Host pipelines for the current draw and dispatch state.
///
/// Failed builds are remembered, so a broken pipeline is only reported once.
pub struct PipelineCache<D: Device> {
    device: Arc<D>,
    memory: Arc<dyn GuestMemory>,
    config: PipelineCacheConfig,
    options: CompileOptions,
    context: D::Context,
    graphics_cache: AHashMap<GraphicsPipelineKey, Option<GraphicsPipeline<D::Program>>>,
    compute_cache: AHashMap<ComputePipelineKey, Option<ComputePipeline<D::Program>>>,
    /// Content hashes for previously read programs by GPU address.
    program_hashes: AHashMap<u64, u64>,
    /// The file for new records after loading the disk cache.
    cache_file: Option<PathBuf>,
}

/// A recorded pipeline to rebuild from the disk cache.
enum DiskPipeline {
    Graphics(GraphicsPipelineKey, Vec<EnvironmentBlob>),
    Compute(ComputePipelineKey, EnvironmentBlob),
}

enum BuiltPipeline<P> {
    Graphics(GraphicsPipeline<P>),
    Compute(ComputePipeline<P>),
}

impl<D: Device> PipelineCache<D> {
    pub fn new(
        device: Arc<D>,
        memory: Arc<dyn GuestMemory>,
        config: PipelineCacheConfig,
    ) -> Result<Self, PipelineError> {
        let context = device.create_context()?;
        let options = CompileOptions {
            backend: config.backend,
            profile: config.profile.clone(),
        };
        Ok(Self {
            device,
            memory,
            config,
            options,
            context,
            graphics_cache: AHashMap::new(),
            compute_cache: AHashMap::new(),
            program_hashes: AHashMap::new(),
            cache_file: None,
        })
    }

    pub fn config(&self) -> &PipelineCacheConfig {
        &self.config
    }

    /// The number of successfully built graphics pipelines.
    pub fn graphics_pipeline_count(&self) -> usize {
        self.graphics_cache.values().flatten().count()
    }

    /// The number of successfully built compute pipelines.
    pub fn compute_pipeline_count(&self) -> usize {
        self.compute_cache.values().flatten().count()
    }

    /// The pipeline for `state`, building it on this thread if it doesn't exist yet.
    ///
    /// Returns `None` if any program can't be read or the pipeline fails to build.
    pub fn current_graphics_pipeline(
        &mut self,
        state: &GraphicsState,
    ) -> Option<&GraphicsPipeline<D::Program>> {
        let mut environments: [Option<GraphicsEnvironment>; NUM_PROGRAMS] = Default::default();
        let mut hashes = [0u64; NUM_PROGRAMS];
        for (index, hash) in hashes.iter_mut().enumerate() {
            let Some(address) = state.program_address(index) else {
                continue;
            };
            *hash = match self.program_hashes.get(&address) {
                Some(hash) => *hash,
                None => {
                    let env = self.graphics_environment(state, index)?;
                    let hash = env.unique_hash();
                    self.program_hashes.insert(address, hash);
                    environments[index] = Some(env);
                    hash
                }
            };
        }

        let key = state.pipeline_key(hashes);
        if !self.graphics_cache.contains_key(&key) {
            let pipeline = self.create_graphics_pipeline(state, &key, environments);
            self.graphics_cache.insert(key, pipeline);
        }
        self.graphics_cache.get(&key).and_then(Option::as_ref)
    }

    pub fn current_compute_pipeline(
        &mut self,
        state: &ComputeState,
    ) -> Option<&ComputePipeline<D::Program>> {
        let address = state.program_address();
        let mut environment = None;
        let hash = match self.program_hashes.get(&address) {
            Some(hash) => *hash,
            None => {
                let env = self.compute_environment(state)?;
                let hash = env.unique_hash();
                self.program_hashes.insert(address, hash);
                environment = Some(env);
                hash
            }
        };

        let key = state.pipeline_key(hash);
        if !self.compute_cache.contains_key(&key) {
            let pipeline = self.create_compute_pipeline(state, &key, environment);
            self.compute_cache.insert(key, pipeline);
        }
        self.compute_cache.get(&key).and_then(Option::as_ref)
    }

    /// Forget the hashes of programs in the region written by the guest.
    ///
    /// Built pipelines are kept since they are identified by content.
    pub fn invalidate_programs(&mut self, address: u64, size: u64) {
        let end = address.saturating_add(size);
        self.program_hashes
            .retain(|program, _| *program < address || *program >= end);
    }

    /// Build every pipeline recorded in the cache file for `title_id`.
    ///
    /// Progress is reported to `callback` with the number of built and total pipelines.
    /// Requesting `stop` skips any pipelines that haven't started building yet.
    #[tracing::instrument(skip(self, stop, callback))]
    pub fn load_disk_resources<F>(
        &mut self,
        title_id: u64,
        stop: &StopToken,
        callback: F,
    ) -> Result<(), LoadDiskCacheError>
    where
        F: FnMut(LoadStage, usize, usize) + Send + 'static,
    {
        if !self.config.disk_cache {
            return Ok(());
        }
        let callback = Arc::new(Mutex::new(callback));
        let report = |stage, built, total| report_progress(&callback, stage, built, total);

        report(LoadStage::Prepare, 0, 0);
        std::fs::create_dir_all(&self.config.cache_dir)?;
        let path = self.config.cache_file(title_id);
        let file = PipelineCacheFile::load_or_create(&path)?;
        self.cache_file = Some(path);

        let pipelines: Vec<_> = file
            .records
            .iter()
            .filter_map(|record| match disk_pipeline(record) {
                Ok(pipeline) => Some(pipeline),
                Err(e) => {
                    warn!("Skipping pipeline cache record: {e}");
                    None
                }
            })
            .filter(|pipeline| match pipeline {
                DiskPipeline::Graphics(key, _) => !self.graphics_cache.contains_key(key),
                DiskPipeline::Compute(key, _) => !self.compute_cache.contains_key(key),
            })
            .collect();

        let total = pipelines.len();
        info!("Loading {total} pipelines from disk cache");
        report(LoadStage::Build, 0, total);

        let built = if self.config.use_asynchronous_shaders {
            self.build_async(pipelines, stop, callback.clone())?
        } else {
            let mut built = Vec::new();
            for (i, pipeline) in pipelines.into_iter().enumerate() {
                if stop.stop_requested() {
                    break;
                }
                if let Some(pipeline) = build_disk_pipeline(
                    self.device.as_ref(),
                    &mut self.context,
                    &self.options,
                    pipeline,
                ) {
                    built.push(pipeline);
                }
                report(LoadStage::Build, i + 1, total);
            }
            built
        };

        for pipeline in built {
            match pipeline {
                BuiltPipeline::Graphics(p) => {
                    self.graphics_cache.entry(p.key).or_insert(Some(p));
                }
                BuiltPipeline::Compute(p) => {
                    self.compute_cache.entry(p.key).or_insert(Some(p));
                }
            }
        }

        report(LoadStage::Complete, total, total);
        Ok(())
    }

    fn build_async<F>(
        &self,
        pipelines: Vec<DiskPipeline>,
        stop: &StopToken,
        callback: Arc<Mutex<F>>,
    ) -> std::io::Result<Vec<BuiltPipeline<D::Program>>>
    where
        F: FnMut(LoadStage, usize, usize) + Send + 'static,
    {
        let device = self.device.clone();
        let workers = StatefulWorkerPool::new(self.config.worker_count(), "PipelineBuilder", {
            let device = device.clone();
            move || match device.create_context() {
                Ok(context) => Some(context),
                Err(e) => {
                    error!("Error creating compiler context: {e}");
                    None
                }
            }
        })?;

        let total = pipelines.len();
        let built = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(AtomicUsize::new(0));
        for pipeline in pipelines {
            let device = device.clone();
            let options = self.options.clone();
            let stop = stop.clone();
            let built = built.clone();
            let finished = finished.clone();
            let callback = callback.clone();
            workers.queue_work(move |context: &mut Option<D::Context>| {
                if stop.stop_requested() {
                    return;
                }
                let Some(context) = context else {
                    return;
                };
                if let Some(pipeline) =
                    build_disk_pipeline(device.as_ref(), context, &options, pipeline)
                {
                    built.lock().unwrap().push(pipeline);
                }
                let finished = finished.fetch_add(1, Ordering::AcqRel) + 1;
                report_progress(&callback, LoadStage::Build, finished, total);
            });
        }
        workers.wait_for_requests();
        drop(workers);

        let built = std::mem::take(&mut *built.lock().unwrap());
        Ok(built)
    }

    fn graphics_environment(
        &self,
        state: &GraphicsState,
        index: usize,
    ) -> Option<GraphicsEnvironment> {
        GraphicsEnvironment::new(self.memory.clone(), state, index)
            .inspect_err(|e| error!("Error reading {:?} program: {e}", PROGRAM_STAGES[index]))
            .ok()
    }

    fn compute_environment(&self, state: &ComputeState) -> Option<ComputeEnvironment> {
        ComputeEnvironment::new(self.memory.clone(), state)
            .inspect_err(|e| error!("Error reading compute program: {e}"))
            .ok()
    }

    fn create_graphics_pipeline(
        &mut self,
        state: &GraphicsState,
        key: &GraphicsPipelineKey,
        mut environments: [Option<GraphicsEnvironment>; NUM_PROGRAMS],
    ) -> Option<GraphicsPipeline<D::Program>> {
        // Programs with known hashes still need their code for a new pipeline.
        for (index, env) in environments.iter_mut().enumerate() {
            if key.unique_hashes[index] != 0 && env.is_none() {
                *env = Some(self.graphics_environment(state, index)?);
            }
        }

        let pipeline = {
            let mut dyn_environments: Vec<Option<&mut dyn Environment>> = environments
                .iter_mut()
                .map(|env| env.as_mut().map(|env| env as &mut dyn Environment))
                .collect();
            build_graphics_pipeline(
                self.device.as_ref(),
                &mut self.context,
                &self.options,
                key,
                &mut dyn_environments,
            )
        };

        match pipeline {
            Ok(pipeline) => {
                debug!("Built graphics pipeline {:016x}", key.content_hash());
                let blobs = environments
                    .iter()
                    .flatten()
                    .map(GraphicsEnvironment::to_blob)
                    .collect::<Result<Vec<_>, _>>();
                match blobs {
                    Ok(blobs) => self.append_record(PipelineRecord::graphics(key, blobs)),
                    Err(e) => error!("Error saving graphics pipeline: {e}"),
                }
                Some(pipeline)
            }
            Err(e) => {
                error!(
                    "Error building graphics pipeline {:016x}: {e}",
                    key.content_hash()
                );
                None
            }
        }
    }

    fn create_compute_pipeline(
        &mut self,
        state: &ComputeState,
        key: &ComputePipelineKey,
        environment: Option<ComputeEnvironment>,
    ) -> Option<ComputePipeline<D::Program>> {
        let mut env = match environment {
            Some(env) => env,
            None => self.compute_environment(state)?,
        };

        let pipeline = build_compute_pipeline(
            self.device.as_ref(),
            &mut self.context,
            &self.options,
            key,
            &mut env,
        );
        match pipeline {
            Ok(pipeline) => {
                debug!("Built compute pipeline {:016x}", key.content_hash());
                match env.to_blob() {
                    Ok(blob) => self.append_record(PipelineRecord::compute(key, blob)),
                    Err(e) => error!("Error saving compute pipeline: {e}"),
                }
                Some(pipeline)
            }
            Err(e) => {
                error!(
                    "Error building compute pipeline {:016x}: {e}",
                    key.content_hash()
                );
                None
            }
        }
    }

    fn append_record(&self, record: PipelineRecord) {
        if let Some(path) = &self.cache_file {
            if let Err(e) = PipelineCacheFile::append_record(path, &record) {
                error!("Error writing pipeline cache {path:?}: {e}");
            }
        }
    }
}

fn report_progress<F>(callback: &Mutex<F>, stage: LoadStage, built: usize, total: usize)
where
    F: FnMut(LoadStage, usize, usize),
{
    let mut callback = callback.lock().unwrap();
    (*callback)(stage, built, total);
}

fn disk_pipeline(record: &PipelineRecord) -> Result<DiskPipeline, LoadDiskCacheError> {
    match record.kind {
        PipelineKind::Graphics => Ok(DiskPipeline::Graphics(
            record.graphics_key()?,
            record.environments.clone(),
        )),
        PipelineKind::Compute => {
            let key = record.compute_key()?;
            let environment = record
                .environments
                .first()
                .cloned()
                .ok_or(LoadDiskCacheError::MissingEnvironment)?;
            Ok(DiskPipeline::Compute(key, environment))
        }
    }
}

fn build_disk_pipeline<D: Device>(
    device: &D,
    context: &mut D::Context,
    options: &CompileOptions,
    pipeline: DiskPipeline,
) -> Option<BuiltPipeline<D::Program>> {
    match pipeline {
        DiskPipeline::Graphics(key, blobs) => {
            let mut environments: [Option<FileEnvironment>; NUM_PROGRAMS] = Default::default();
            for blob in blobs {
                match PROGRAM_STAGES.iter().position(|s| *s == blob.stage) {
                    Some(index) => environments[index] = Some(FileEnvironment::new(blob)),
                    None => {
                        warn!("Skipping {:?} environment in graphics pipeline", blob.stage);
                        return None;
                    }
                }
            }
            let mut dyn_environments: Vec<Option<&mut dyn Environment>> = environments
                .iter_mut()
                .map(|env| env.as_mut().map(|env| env as &mut dyn Environment))
                .collect();
            build_graphics_pipeline(device, context, options, &key, &mut dyn_environments)
                .inspect_err(|e| {
                    error!(
                        "Error building cached graphics pipeline {:016x}: {e}",
                        key.content_hash()
                    )
                })
                .ok()
                .map(BuiltPipeline::Graphics)
        }
        DiskPipeline::Compute(key, blob) => {
            let mut env = FileEnvironment::new(blob);
            build_compute_pipeline(device, context, options, &key, &mut env)
                .inspect_err(|e| {
                    error!(
                        "Error building cached compute pipeline {:016x}: {e}",
                        key.content_hash()
                    )
                })
                .ok()
                .map(BuiltPipeline::Compute)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StageCode;
    use crate::environment::tests::TestMemory;
    use crate::state::{ConstBufferBinding, DescriptorTable};
    use mxw_lib::Stage;
    use pretty_assertions::assert_eq;

    /// A device that records the stages of each linked program.
    #[derive(Default)]
    struct TestDevice {
        links: AtomicUsize,
        contexts: AtomicUsize,
        /// Fail linking any pipeline with a fragment stage.
        fail_fragment: bool,
    }

    impl Device for TestDevice {
        type Context = usize;
        type Program = Vec<Stage>;

        fn create_context(&self) -> Result<usize, PipelineError> {
            Ok(self.contexts.fetch_add(1, Ordering::SeqCst))
        }

        fn link_graphics(
            &self,
            _context: &mut usize,
            stages: &[StageCode],
        ) -> Result<Vec<Stage>, PipelineError> {
            if self.fail_fragment && stages.iter().any(|s| s.stage == Stage::Fragment) {
                return Err(PipelineError::Link("fragment".to_string()));
            }
            self.links.fetch_add(1, Ordering::SeqCst);
            Ok(stages.iter().map(|s| s.stage).collect())
        }

        fn link_compute(
            &self,
            _context: &mut usize,
            stage: &StageCode,
        ) -> Result<Vec<Stage>, PipelineError> {
            self.links.fetch_add(1, Ordering::SeqCst);
            Ok(vec![stage.stage])
        }
    }

    fn memory() -> TestMemory {
        let mut memory = TestMemory::default();
        // Vertex program at offset 0x100 with an empty header.
        memory.write_code(0x10100, &[0u64; 10]);
        memory.write_program(0x10150);
        // Fragment program at offset 0x200 writing render target 0.
        let mut header = [0u64; 10];
        header[9] = 0xf;
        memory.write_code(0x10200, &header);
        memory.write_program(0x10250);
        // Compute program at offset 0x400.
        memory.write_program(0x10400);
        memory
    }

    fn graphics_state() -> GraphicsState {
        let mut state = GraphicsState {
            program_base: 0x10000,
            ..Default::default()
        };
        state.programs[1].enabled = true;
        state.programs[1].offset = 0x100;
        state.programs[5].enabled = true;
        state.programs[5].offset = 0x200;
        state
    }

    fn compute_state() -> ComputeState {
        let mut state = ComputeState {
            program_base: 0x10000,
            start_address: 0x400,
            workgroup_size: [64, 1, 1],
            ..Default::default()
        };
        state.resources.const_buffers[0] = ConstBufferBinding {
            enabled: true,
            address: 0x20000,
            size: 0x100,
        };
        state.tic = DescriptorTable {
            address: 0x30000,
            limit: 0,
        };
        state
    }

    fn config() -> PipelineCacheConfig {
        PipelineCacheConfig {
            disk_cache: false,
            ..Default::default()
        }
    }

    #[test]
    fn graphics_pipeline_is_built_once() {
        let device = Arc::new(TestDevice::default());
        let mut cache = PipelineCache::new(device.clone(), Arc::new(memory()), config()).unwrap();

        let state = graphics_state();
        let stages = cache
            .current_graphics_pipeline(&state)
            .map(|p| p.program.clone());
        assert_eq!(Some(vec![Stage::VertexB, Stage::Fragment]), stages);
        assert!(cache.current_graphics_pipeline(&state).is_some());
        assert_eq!(1, device.links.load(Ordering::SeqCst));
        assert_eq!(1, cache.graphics_pipeline_count());
    }

    #[test]
    fn dual_vertex_programs_are_merged() {
        let device = Arc::new(TestDevice::default());
        let mut memory = memory();
        // First vertex program at offset 0x300 with an empty header.
        memory.write_code(0x10300, &[0u64; 10]);
        memory.write_program(0x10350);
        let mut cache = PipelineCache::new(device.clone(), Arc::new(memory), config()).unwrap();

        let mut state = graphics_state();
        state.programs[0].enabled = true;
        state.programs[0].offset = 0x300;
        let pipeline = cache.current_graphics_pipeline(&state).unwrap();
        assert_eq!(vec![Stage::VertexB, Stage::Fragment], pipeline.program);
        assert_eq!(
            vec![Stage::VertexB, Stage::Fragment],
            pipeline.stages.iter().map(|s| s.stage).collect::<Vec<_>>()
        );
        assert_eq!(1, device.links.load(Ordering::SeqCst));
    }

    #[test]
    fn same_code_at_another_address_shares_pipeline() {
        let device = Arc::new(TestDevice::default());
        let mut memory = memory();
        let mut header = [0u64; 10];
        header[9] = 0xf;
        memory.write_code(0x10600, &header);
        memory.write_program(0x10650);
        let mut cache = PipelineCache::new(device.clone(), Arc::new(memory), config()).unwrap();

        let mut state = graphics_state();
        assert!(cache.current_graphics_pipeline(&state).is_some());
        state.programs[5].offset = 0x600;
        assert!(cache.current_graphics_pipeline(&state).is_some());
        assert_eq!(1, device.links.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_pipelines_are_not_rebuilt() {
        let device = Arc::new(TestDevice {
            fail_fragment: true,
            ..Default::default()
        });
        let mut cache = PipelineCache::new(device.clone(), Arc::new(memory()), config()).unwrap();

        let state = graphics_state();
        assert!(cache.current_graphics_pipeline(&state).is_none());
        assert!(cache.current_graphics_pipeline(&state).is_none());
        assert_eq!(0, cache.graphics_pipeline_count());
        assert_eq!(1, cache.graphics_cache.len());
    }

    #[test]
    fn missing_vertex_program() {
        let device = Arc::new(TestDevice::default());
        let mut cache = PipelineCache::new(device.clone(), Arc::new(memory()), config()).unwrap();

        let mut state = graphics_state();
        state.programs[1].enabled = false;
        assert!(cache.current_graphics_pipeline(&state).is_none());
        assert_eq!(0, device.links.load(Ordering::SeqCst));
    }

    #[test]
    fn unreadable_program() {
        let device = Arc::new(TestDevice::default());
        let mut cache = PipelineCache::new(device, Arc::new(memory()), config()).unwrap();

        let mut state = graphics_state();
        state.programs[5].offset = 0x8000;
        assert!(cache.current_graphics_pipeline(&state).is_none());
        // Nothing was cached for the unreadable program.
        assert!(cache.graphics_cache.is_empty());
        assert_eq!(1, cache.program_hashes.len());
    }

    #[test]
    fn compute_pipeline_keys_include_workgroup_size() {
        let device = Arc::new(TestDevice::default());
        let mut cache = PipelineCache::new(device.clone(), Arc::new(memory()), config()).unwrap();

        let mut state = compute_state();
        let stages = cache
            .current_compute_pipeline(&state)
            .map(|p| p.program.clone());
        assert_eq!(Some(vec![Stage::Compute]), stages);
        assert!(cache.current_compute_pipeline(&state).is_some());
        assert_eq!(1, device.links.load(Ordering::SeqCst));

        state.workgroup_size = [32, 2, 1];
        assert!(cache.current_compute_pipeline(&state).is_some());
        assert_eq!(2, device.links.load(Ordering::SeqCst));
        assert_eq!(2, cache.compute_pipeline_count());
    }

    #[test]
    fn invalidated_programs_are_hashed_again() {
        let device = Arc::new(TestDevice::default());
        let mut cache = PipelineCache::new(device, Arc::new(memory()), config()).unwrap();

        let state = compute_state();
        assert!(cache.current_compute_pipeline(&state).is_some());
        assert_eq!(1, cache.program_hashes.len());

        cache.invalidate_programs(0x10000, 0x100);
        assert_eq!(1, cache.program_hashes.len());
        cache.invalidate_programs(0x10400, 8);
        assert!(cache.program_hashes.is_empty());
    }

    #[test]
    fn disabled_disk_cache_loads_nothing() {
        let device = Arc::new(TestDevice::default());
        let mut cache = PipelineCache::new(device, Arc::new(memory()), config()).unwrap();

        let stages = Arc::new(Mutex::new(Vec::new()));
        let reported = stages.clone();
        cache
            .load_disk_resources(1, &StopToken::new(), move |stage, _, _| {
                reported.lock().unwrap().push(stage)
            })
            .unwrap();
        assert!(stages.lock().unwrap().is_empty());
    }
}
