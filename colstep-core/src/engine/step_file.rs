//! StepFile engine: per-rank data subfiles plus a metadata index
//!
//! Every rank appends its step records to its own `data.<rank>` file. Rank 0
//! owns `md.idx`, rewritten after each collective step boundary. Readers
//! replay the committed steps of every subfile in (step, rank) order.

use super::record::{DataHeader, DATA_HEADER_SIZE};
use super::{
    Block, Engine, EngineConfig, EngineSession, Mode, Selection,
    StepFileOptions, StepRecord, StreamMeta, SyncPolicy, Transport, VariableDef, VariableStore,
};
use crate::group::ProcessGroup;
use crate::types::ArrayData;
use crate::{ColStepError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const META_FILE: &str = "md.idx";

fn data_file(dir: &Path, rank: usize) -> PathBuf {
    dir.join(format!("data.{}", rank))
}

fn read_meta(dir: &Path) -> Result<StreamMeta> {
    let mut data = Vec::new();
    File::open(dir.join(META_FILE))?.read_to_end(&mut data)?;
    StreamMeta::decode(&data)
}

fn write_meta(dir: &Path, meta: &StreamMeta) -> Result<()> {
    let tmp = dir.join(format!("{}.tmp", META_FILE));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&meta.encode()?)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, dir.join(META_FILE))?;
    Ok(())
}

/// File-backed engine
pub struct StepFileEngine {
    options: StepFileOptions,
    transports: Vec<Transport>,
    engine_params: BTreeMap<String, String>,
}

impl StepFileEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            options: StepFileOptions::from_params(&config.engine_params)?,
            transports: config.transports(),
            engine_params: config.engine_params.clone(),
        })
    }
}

impl Engine for StepFileEngine {
    fn name(&self) -> &str {
        super::DEFAULT_ENGINE
    }

    fn open(
        &self,
        path: &Path,
        mode: Mode,
        group: &ProcessGroup,
    ) -> Result<Box<dyn EngineSession>> {
        match mode {
            Mode::Write => Ok(Box::new(StepFileWriter::create(self, path, group)?)),
            Mode::Read => Ok(Box::new(StepFileReader::open(path)?)),
        }
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_dir_all(path)?;
            info!("Removed stream {:?}", path);
        }
        Ok(())
    }
}

/// Write session of one rank
pub struct StepFileWriter {
    dir: PathBuf,
    group: ProcessGroup,
    options: StepFileOptions,
    file: Option<BufWriter<File>>,
    meta: StreamMeta,
    stores: HashMap<String, VariableStore>,
    pending: Vec<Block>,
    current_step: Option<u64>,
    closed: bool,
}

impl StepFileWriter {
    fn open_data_file(dir: &Path, rank: usize) -> Result<(StreamMeta, BufWriter<File>)> {
        let meta = read_meta(dir)?;
        let mut file = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(data_file(dir, rank))?,
        );
        let header = DataHeader {
            rank: rank as u32,
            stream_id: meta.stream_id,
        };
        file.write_all(&header.to_bytes())?;
        Ok((meta, file))
    }

    fn create(engine: &StepFileEngine, dir: &Path, group: &ProcessGroup) -> Result<Self> {
        let rank = group.rank();

        // Rank 0 resets the stream and publishes the stream id through md.idx
        let setup = if group.is_root() {
            Self::reset_stream(engine, dir, group.size() as u32)
        } else {
            Ok(())
        };
        if let Err(e) = &setup {
            group.abort(&format!("stream setup failed: {}", e));
        }
        let synced = group.barrier();
        setup?;
        synced?;

        let opened = Self::open_data_file(dir, rank);
        if let Err(e) = &opened {
            group.abort(&format!("rank {} could not open its data file: {}", rank, e));
        }
        let (meta, file) = opened?;

        info!(
            "Opened StepFile stream {:?} for writing (rank {} of {})",
            dir,
            rank,
            group.size()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            group: group.clone(),
            options: engine.options,
            file: Some(file),
            meta,
            stores: HashMap::new(),
            pending: Vec::new(),
            current_step: None,
            closed: false,
        })
    }

    fn reset_stream(engine: &StepFileEngine, dir: &Path, ranks: u32) -> Result<()> {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        fs::create_dir_all(dir)?;
        let mut meta = StreamMeta::new(super::DEFAULT_ENGINE, ranks);
        meta.transports = engine.transports.clone();
        meta.engine_params = engine.engine_params.clone();
        write_meta(dir, &meta)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ColStepError::UsageOrder("engine session is closed".into()));
        }
        Ok(())
    }

    fn sync_data(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
            file.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Write this rank's record for the open step to its subfile
    fn commit_local(&mut self, step: u64) -> Result<()> {
        let record = StepRecord {
            rank: self.group.rank() as u32,
            step,
            blocks: std::mem::take(&mut self.pending),
        };
        let encoded = record.encode(self.options.compression)?;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ColStepError::UsageOrder("data subfile not open".into()))?;
        file.write_all(&encoded)?;
        file.flush()?;
        if self.options.sync_policy == SyncPolicy::Immediate {
            file.get_ref().sync_all()?;
        }
        debug!(
            "Rank {} wrote step {} ({} blocks, {} bytes)",
            record.rank,
            step,
            record.blocks.len(),
            encoded.len()
        );
        Ok(())
    }
}

impl EngineSession for StepFileWriter {
    fn mode(&self) -> Mode {
        Mode::Write
    }

    fn define_variable(&mut self, def: VariableDef) -> Result<()> {
        self.ensure_open()?;
        if let Some(existing) = self.stores.get(&def.name) {
            if existing.def() == &def {
                return Ok(());
            }
            return Err(ColStepError::Engine(format!(
                "variable {} redefined from {:?} to {:?}",
                def.name,
                existing.def(),
                def
            )));
        }
        debug!(
            "Defined variable {} ({}, shape {:?})",
            def.name, def.kind, def.shape
        );
        self.meta.variables.push(def.clone());
        self.stores.insert(def.name.clone(), VariableStore::new(def));
        Ok(())
    }

    fn variables(&self) -> Vec<VariableDef> {
        self.meta.variables.clone()
    }

    fn begin_step(&mut self) -> Result<u64> {
        self.ensure_open()?;
        if let Some(step) = self.current_step {
            return Err(ColStepError::UsageOrder(format!(
                "step {} is already open",
                step
            )));
        }
        self.group.barrier()?;
        let step = self.meta.steps;
        self.current_step = Some(step);
        Ok(step)
    }

    fn current_step(&self) -> Option<u64> {
        self.current_step
    }

    fn steps(&self) -> u64 {
        self.meta.steps
    }

    fn put(&mut self, variable: &str, selection: &Selection, data: ArrayData) -> Result<()> {
        self.ensure_open()?;
        if self.current_step.is_none() {
            return Err(ColStepError::UsageOrder(format!(
                "put to {} outside of a step",
                variable
            )));
        }
        let store = self
            .stores
            .get_mut(variable)
            .ok_or_else(|| ColStepError::Engine(format!("unknown variable {}", variable)))?;
        store.write(selection, &data)?;
        self.pending.push(Block {
            variable: variable.to_string(),
            selection: selection.clone(),
            data,
        });
        Ok(())
    }

    fn get(&mut self, variable: &str, selection: &Selection) -> Result<ArrayData> {
        self.ensure_open()?;
        self.stores
            .get(variable)
            .ok_or_else(|| ColStepError::Engine(format!("unknown variable {}", variable)))?
            .read(selection)
    }

    fn end_step(&mut self) -> Result<()> {
        self.ensure_open()?;
        let step = self.current_step.ok_or_else(|| {
            ColStepError::UsageOrder("end_step without an open step".into())
        })?;

        if let Err(e) = self.commit_local(step) {
            self.group.abort(&format!("step {} commit failed: {}", step, e));
            return Err(e);
        }
        self.current_step = None;
        self.group.barrier()?;

        self.meta.steps = step + 1;
        if self.group.is_root() {
            self.meta.ranks = self.group.size() as u32;
            write_meta(&self.dir, &self.meta)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.current_step.is_some() {
            self.end_step()?;
        }
        self.closed = true;

        if self.options.sync_policy != SyncPolicy::None {
            self.sync_data()?;
        } else if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        self.file = None;

        self.group.barrier()?;
        if self.group.is_root() {
            write_meta(&self.dir, &self.meta)?;
        }
        info!(
            "Closed StepFile stream {:?} after {} steps (rank {})",
            self.dir,
            self.meta.steps,
            self.group.rank()
        );
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for StepFileWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("Failed to close StepFile stream {:?}: {}", self.dir, e);
                self.group.abort(&e.to_string());
            }
        }
    }
}

/// Read session over every rank's committed steps
pub struct StepFileReader {
    dir: PathBuf,
    meta: StreamMeta,
    stores: HashMap<String, VariableStore>,
    closed: bool,
}

impl StepFileReader {
    fn open(dir: &Path) -> Result<Self> {
        let meta = read_meta(dir)?;
        let mut stores: HashMap<String, VariableStore> = meta
            .variables
            .iter()
            .map(|def| (def.name.clone(), VariableStore::new(def.clone())))
            .collect();

        let mut records = Vec::new();
        for rank in 0..meta.ranks as usize {
            records.extend(Self::read_subfile(dir, rank, meta.stream_id, meta.steps)?);
        }
        records.sort_by_key(|r| (r.step, r.rank));

        for record in &records {
            for block in &record.blocks {
                let store = stores.get_mut(&block.variable).ok_or_else(|| {
                    ColStepError::Corruption(format!(
                        "step {} of rank {} writes undefined variable {}",
                        record.step, record.rank, block.variable
                    ))
                })?;
                store.write(&block.selection, &block.data)?;
            }
        }

        info!(
            "Opened StepFile stream {:?} for reading ({} variables, {} steps, {} ranks)",
            dir,
            meta.variables.len(),
            meta.steps,
            meta.ranks
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
            stores,
            closed: false,
        })
    }

    fn read_subfile(
        dir: &Path,
        rank: usize,
        stream_id: Uuid,
        committed_steps: u64,
    ) -> Result<Vec<StepRecord>> {
        let path = data_file(dir, rank);
        let mut data = Vec::new();
        File::open(&path)?.read_to_end(&mut data)?;

        let header = DataHeader::from_bytes(&data)?;
        if header.stream_id != stream_id || header.rank as usize != rank {
            return Err(ColStepError::Corruption(format!(
                "subfile {:?} belongs to another stream or rank",
                path
            )));
        }

        let mut records = Vec::new();
        let mut offset = DATA_HEADER_SIZE;
        while offset < data.len() {
            let (record, used) = StepRecord::decode(&data[offset..])?;
            offset += used;
            if record.step < committed_steps {
                records.push(record);
            } else {
                debug!(
                    "Skipping uncommitted step {} in {:?}",
                    record.step, path
                );
            }
        }

        if (records.len() as u64) < committed_steps {
            return Err(ColStepError::Corruption(format!(
                "subfile {:?} holds {} of {} committed steps",
                path,
                records.len(),
                committed_steps
            )));
        }
        Ok(records)
    }

    /// Stream metadata as recorded by the writer
    pub fn meta(&self) -> &StreamMeta {
        &self.meta
    }
}

impl EngineSession for StepFileReader {
    fn mode(&self) -> Mode {
        Mode::Read
    }

    fn define_variable(&mut self, def: VariableDef) -> Result<()> {
        // Readers accept definitions that match what the stream holds
        match self.stores.get(&def.name) {
            Some(store) if store.def() == &def => Ok(()),
            Some(store) => Err(ColStepError::Engine(format!(
                "variable {} in stream {:?} is {:?}, expected {:?}",
                def.name,
                self.dir,
                store.def(),
                def
            ))),
            None => Err(ColStepError::Engine(format!(
                "variable {} not found in stream {:?}",
                def.name, self.dir
            ))),
        }
    }

    fn variables(&self) -> Vec<VariableDef> {
        self.meta.variables.clone()
    }

    fn begin_step(&mut self) -> Result<u64> {
        Err(ColStepError::UsageOrder(
            "step boundaries apply to write sessions".into(),
        ))
    }

    fn current_step(&self) -> Option<u64> {
        None
    }

    fn steps(&self) -> u64 {
        self.meta.steps
    }

    fn put(&mut self, variable: &str, _selection: &Selection, _data: ArrayData) -> Result<()> {
        Err(ColStepError::UsageOrder(format!(
            "put to {} on a read session",
            variable
        )))
    }

    fn get(&mut self, variable: &str, selection: &Selection) -> Result<ArrayData> {
        if self.closed {
            return Err(ColStepError::UsageOrder("engine session is closed".into()));
        }
        self.stores
            .get(variable)
            .ok_or_else(|| ColStepError::Engine(format!("unknown variable {}", variable)))?
            .read(selection)
    }

    fn end_step(&mut self) -> Result<()> {
        Err(ColStepError::UsageOrder(
            "step boundaries apply to write sessions".into(),
        ))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.stores.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::ThreadGroup;
    use crate::types::ElementKind;
    use std::thread;
    use tempfile::TempDir;

    fn engine(params: &[(&str, &str)]) -> StepFileEngine {
        let mut config = EngineConfig::default();
        for (k, v) in params {
            config.engine_params.insert(k.to_string(), v.to_string());
        }
        StepFileEngine::new(&config).unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("t.colstep");
        let engine = engine(&[("Compression", "lz4")]);
        let group = ProcessGroup::single();

        {
            let mut writer = engine.open(&path, Mode::Write, &group).unwrap();
            writer
                .define_variable(VariableDef::new("x", ElementKind::Float64, vec![2, 2]))
                .unwrap();
            assert!(writer
                .put(
                    "x",
                    &Selection::new(vec![0, 0], vec![1, 2]),
                    ArrayData::Float64(vec![1.0, 2.0]),
                )
                .is_err());

            assert_eq!(writer.begin_step().unwrap(), 0);
            writer
                .put(
                    "x",
                    &Selection::new(vec![0, 0], vec![1, 2]),
                    ArrayData::Float64(vec![1.0, 2.0]),
                )
                .unwrap();
            writer.end_step().unwrap();

            writer.begin_step().unwrap();
            writer
                .put(
                    "x",
                    &Selection::new(vec![1, 0], vec![1, 2]),
                    ArrayData::Float64(vec![3.0, 4.0]),
                )
                .unwrap();
            writer.close().unwrap();
            writer.close().unwrap();
        }

        let mut reader = engine.open(&path, Mode::Read, &group).unwrap();
        assert_eq!(reader.steps(), 2);
        let all = reader
            .get("x", &Selection::new(vec![0, 0], vec![2, 2]))
            .unwrap();
        assert_eq!(all, ArrayData::Float64(vec![1.0, 2.0, 3.0, 4.0]));
        assert!(reader
            .put(
                "x",
                &Selection::new(vec![0, 0], vec![1, 1]),
                ArrayData::Float64(vec![0.0])
            )
            .is_err());
    }

    #[test]
    fn test_multi_rank_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ranks.colstep");
        let ranks = 3;

        let handles: Vec<_> = ThreadGroup::new(ranks)
            .into_iter()
            .map(|group| {
                let path = path.clone();
                thread::spawn(move || {
                    let engine = engine(&[]);
                    let mut writer = engine.open(&path, Mode::Write, &group).unwrap();
                    writer
                        .define_variable(VariableDef::new("r", ElementKind::UInt32, vec![3]))
                        .unwrap();
                    writer.begin_step().unwrap();
                    let rank = group.rank() as u64;
                    writer
                        .put(
                            "r",
                            &Selection::new(vec![rank], vec![1]),
                            ArrayData::UInt32(vec![rank as u32 * 10]),
                        )
                        .unwrap();
                    writer.end_step().unwrap();
                    // second step: only rank 0 contributes, others still take part
                    writer.begin_step().unwrap();
                    if rank == 0 {
                        writer
                            .put(
                                "r",
                                &Selection::new(vec![0], vec![1]),
                                ArrayData::UInt32(vec![99]),
                            )
                            .unwrap();
                    }
                    writer.close().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut reader = engine(&[])
            .open(&path, Mode::Read, &ProcessGroup::single())
            .unwrap();
        assert_eq!(reader.steps(), 2);
        let values = reader.get("r", &Selection::new(vec![0], vec![3])).unwrap();
        assert_eq!(values, ArrayData::UInt32(vec![99, 10, 20]));
    }

    #[test]
    fn test_corrupted_subfile() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.colstep");
        let engine = engine(&[]);
        {
            let mut writer = engine.open(&path, Mode::Write, &ProcessGroup::single()).unwrap();
            writer
                .define_variable(VariableDef::new("s", ElementKind::String, vec![1]))
                .unwrap();
            writer.begin_step().unwrap();
            writer
                .put(
                    "s",
                    &Selection::new(vec![0], vec![1]),
                    ArrayData::String(vec!["hello".into()]),
                )
                .unwrap();
            writer.close().unwrap();
        }

        let subfile = data_file(&path, 0);
        let mut bytes = fs::read(&subfile).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        fs::write(&subfile, bytes).unwrap();

        let result = engine.open(&path, Mode::Read, &ProcessGroup::single());
        assert!(matches!(result, Err(ColStepError::ChecksumMismatch { .. })));
    }
}
