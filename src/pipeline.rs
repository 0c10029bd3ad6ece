//! The orchestrator: drives the frame reader, submits decompression work to
//! the pool, re-sequences results by frame index, and decodes blocks onto
//! the consumer in strict file order.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use crate::block::PrimitiveBlock;
use crate::codec::CodecRegistry;
use crate::error::{Error, Warning};
use crate::frame::{BlockKind, FrameReader};
use crate::header::HeaderBlock;
use crate::pool::{CancelToken, Priority, TaskHandle, WorkerPool};
use crate::Consumer;

/// Tunables for a [`Pipeline`] run. Construct with
/// [`PipelineConfig::default`] and override selectively.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Workers kept alive even when idle.
    pub min_workers: usize,
    /// The hard concurrency ceiling for decompression.
    pub max_workers: usize,
    /// Maximum number of decompression tasks outstanding at once.
    pub in_flight_bound: usize,
    /// How long an idle worker above `min_workers` waits before exiting.
    pub idle_timeout: Duration,
    /// Safety ceiling on a single blob's decompressed size.
    pub max_blob_size: usize,
    /// Safety ceiling on a single `BlobHeader`'s encoded size.
    pub max_blob_header_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let max_workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2).saturating_sub(1).max(1);
        Self {
            min_workers: 1,
            max_workers,
            in_flight_bound: 2 * max_workers,
            idle_timeout: Duration::from_secs(5),
            max_blob_size: 64 * 1024 * 1024,
            max_blob_header_size: 65_536,
        }
    }
}

/// A cooperative cancellation handle for a running [`Pipeline`]. Cloning
/// shares the same underlying flag, so a caller can hold one while the
/// pipeline itself holds another.
#[derive(Clone, Default)]
pub struct CancelHandle(CancelToken);

impl CancelHandle {
    pub fn new() -> Self {
        Self(CancelToken::new())
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }
}

struct InFlight {
    index: u64,
    kind: BlockKind,
    handle: TaskHandle,
}

/// Tracks header-related state across the run: whether a header has been
/// seen (to detect a duplicate) and whether the missing-header warning has
/// already fired (so it fires at most once).
#[derive(Default)]
struct HeaderState {
    seen: bool,
    missing_warned: bool,
}

/// Reads a byte source as a sequence of OSM entities, decompressing blobs
/// across a bounded worker pool while preserving file order.
pub struct Pipeline<R> {
    frames: FrameReader<R>,
    pool: WorkerPool,
    codecs: Arc<CodecRegistry>,
    config: PipelineConfig,
    cancel: CancelHandle,
}

impl<R: Read> Pipeline<R> {
    pub fn new(source: R, config: PipelineConfig) -> Self {
        let pool = WorkerPool::new(config.min_workers, config.max_workers, config.idle_timeout);
        Self {
            frames: FrameReader::new(source, config.max_blob_header_size),
            pool,
            codecs: Arc::new(CodecRegistry::default()),
            config,
            cancel: CancelHandle::new(),
        }
    }

    /// A handle that can be used from another thread to request
    /// cancellation of this run.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Drives the pipeline to completion (or cancellation, or a terminal
    /// error), invoking `consumer` callbacks strictly in file order.
    pub fn run<C: Consumer>(mut self, consumer: &mut C) {
        let mut in_flight: VecDeque<InFlight> = VecDeque::new();
        let mut header_state = HeaderState::default();
        let mut reached_eof = false;
        let mut pending_error: Option<(Error, Option<u64>)> = None;

        loop {
            while !reached_eof
                && pending_error.is_none()
                && !self.cancel.0.is_cancelled()
                && in_flight.len() < self.config.in_flight_bound
            {
                match self.frames.next_frame() {
                    Ok(Some(frame)) => {
                        let index = frame.index;
                        let kind = frame.kind;
                        let blob_owned = frame.blob.to_vec();
                        let codecs = self.codecs.clone();
                        let max_blob_size = self.config.max_blob_size;

                        match self.pool.submit(index, Priority::Normal, move || codecs.decode_blob(&blob_owned, max_blob_size)) {
                            Ok(handle) => in_flight.push_back(InFlight { index, kind, handle }),
                            Err(e) => pending_error = Some((e, Some(index))),
                        }
                    }
                    Ok(None) => reached_eof = true,
                    Err(e) => pending_error = Some((e, None)),
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let head = in_flight.pop_front().expect("checked non-empty above");
            if pending_error.is_some() || self.cancel.0.is_cancelled() {
                // Drain without decoding: discard the result, keep freeing workers.
                let _ = head.handle.wait();
                continue;
            }

            match head.handle.wait() {
                Ok(bytes) => {
                    if let Err(e) = decode_and_dispatch(head.kind, &bytes, &mut header_state, consumer) {
                        pending_error = Some((e, Some(head.index)));
                    }
                }
                Err(e) => pending_error = Some((e, Some(head.index))),
            }
        }

        self.pool.shutdown();

        if let Some((error, index)) = pending_error {
            consumer.on_error(&error, index);
        } else if self.cancel.0.is_cancelled() {
            consumer.on_cancelled();
        } else {
            consumer.on_end();
        }
    }
}

fn decode_and_dispatch<C: Consumer>(
    kind: BlockKind,
    bytes: &[u8],
    header_state: &mut HeaderState,
    consumer: &mut C,
) -> Result<(), Error> {
    match kind {
        BlockKind::Header => {
            if header_state.seen {
                return Err(Error::InvalidBlockType("a second OSMHeader frame appeared mid-stream".into()));
            }
            header_state.seen = true;
            let header = HeaderBlock::parse(bytes)?;
            consumer.on_header(&header);
            for feature in &header.optional_features {
                if !crate::header::RECOGNIZED_OPTIONAL_FEATURES.contains(&feature.as_str()) {
                    consumer.on_warning(Warning::UnrecognizedOptionalFeature(feature.clone()));
                }
            }
            Ok(())
        }
        BlockKind::Data => {
            if !header_state.seen && !header_state.missing_warned {
                consumer.on_warning(Warning::MissingHeader);
                header_state.missing_warned = true;
            }

            let block = PrimitiveBlock::parse(bytes)?;
            for _ in 0..block.changeset_group_count() {
                consumer.on_warning(Warning::SkippedChangeSetGroup);
            }

            for node in block.dense_nodes() {
                consumer.on_node(&node?);
            }
            for node in block.sparse_nodes() {
                consumer.on_node(&node?);
            }
            for way in block.ways() {
                consumer.on_way(&way?);
            }
            for relation in block.relations() {
                consumer.on_relation(&relation?);
            }
            Ok(())
        }
        BlockKind::Unknown => Err(Error::InvalidBlockType("unrecognized BlobHeader.type".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn key(number: u32, wire_type: u8) -> Vec<u8> {
        let mut out = Vec::new();
        let mut v = ((number as u64) << 3) | wire_type as u64;
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            } else {
                out.push(byte | 0x80);
            }
        }
        out
    }

    fn string_field(number: u32, s: &str) -> Vec<u8> {
        let mut out = key(number, 2);
        out.push(s.len() as u8);
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn varint_field(number: u32, value: u64) -> Vec<u8> {
        let mut out = key(number, 0);
        let mut v = value;
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            } else {
                out.push(byte | 0x80);
            }
        }
        out
    }

    fn blob_raw(payload: &[u8]) -> Vec<u8> {
        let mut out = key(1, 2);
        out.push(payload.len() as u8);
        out.extend_from_slice(payload);
        out.extend(varint_field(2, payload.len() as u64));
        out
    }

    fn frame(type_str: &str, payload: &[u8]) -> Vec<u8> {
        let blob = blob_raw(payload);
        let mut header = string_field(1, type_str);
        header.extend(varint_field(3, blob.len() as u64));

        let mut out = Vec::new();
        out.extend((header.len() as u32).to_be_bytes());
        out.extend(header);
        out.extend(blob);
        out
    }

    #[derive(Default)]
    struct RecordingConsumer {
        headers: usize,
        nodes: usize,
        ways: usize,
        relations: usize,
        warnings: Vec<Warning>,
        errors: Vec<(String, Option<u64>)>,
        ended: bool,
    }

    impl Consumer for RecordingConsumer {
        fn on_header(&mut self, _header: &HeaderBlock) {
            self.headers += 1;
        }
        fn on_node(&mut self, _node: &crate::block::Node) {
            self.nodes += 1;
        }
        fn on_way(&mut self, _way: &crate::block::Way) {
            self.ways += 1;
        }
        fn on_relation(&mut self, _relation: &crate::block::Relation) {
            self.relations += 1;
        }
        fn on_warning(&mut self, warning: Warning) {
            self.warnings.push(warning);
        }
        fn on_end(&mut self) {
            self.ended = true;
        }
        fn on_error(&mut self, error: &Error, index: Option<u64>) {
            self.errors.push((error.to_string(), index));
        }
        fn on_cancelled(&mut self) {}
    }

    #[test]
    fn empty_file_is_a_no_op() {
        let pipeline = Pipeline::new(Cursor::new(Vec::<u8>::new()), PipelineConfig::default());
        let mut consumer = RecordingConsumer::default();
        pipeline.run(&mut consumer);
        assert!(consumer.ended);
        assert_eq!(consumer.headers, 0);
    }

    #[test]
    fn header_only_file_emits_header_then_end() {
        let header_body = string_field(4, "OsmSchema-V0.6");
        let bytes = frame("OSMHeader", &header_body);

        let pipeline = Pipeline::new(Cursor::new(bytes), PipelineConfig::default());
        let mut consumer = RecordingConsumer::default();
        pipeline.run(&mut consumer);

        assert_eq!(consumer.headers, 1);
        assert_eq!(consumer.nodes, 0);
        assert!(consumer.ended);
    }

    #[test]
    fn data_before_header_warns_but_continues() {
        let mut dense = key(1, 2);
        dense.push(1);
        dense.push(0); // single node, id delta 0
        dense.extend(key(8, 2));
        dense.push(1);
        dense.push(0);
        dense.extend(key(9, 2));
        dense.push(1);
        dense.push(0);

        let mut group = key(2, 2);
        group.push(dense.len() as u8);
        group.extend(dense);

        let bytes = frame("OSMData", &group);
        let pipeline = Pipeline::new(Cursor::new(bytes), PipelineConfig::default());
        let mut consumer = RecordingConsumer::default();
        pipeline.run(&mut consumer);

        assert_eq!(consumer.warnings, vec![Warning::MissingHeader]);
        assert_eq!(consumer.nodes, 1);
        assert!(consumer.ended);
    }

    #[test]
    fn truncated_stream_is_reported_via_on_error() {
        let header_body = string_field(4, "OsmSchema-V0.6");
        let mut bytes = frame("OSMHeader", &header_body);
        bytes.truncate(bytes.len() - 2);

        let pipeline = Pipeline::new(Cursor::new(bytes), PipelineConfig::default());
        let mut consumer = RecordingConsumer::default();
        pipeline.run(&mut consumer);

        assert!(!consumer.ended);
        assert_eq!(consumer.errors.len(), 1);
    }

    #[test]
    fn unrecognized_optional_feature_warns_but_does_not_fail() {
        let mut header_body = string_field(4, "OsmSchema-V0.6");
        header_body.extend(string_field(5, "Some.Future.Optional.Thing"));
        let bytes = frame("OSMHeader", &header_body);

        let pipeline = Pipeline::new(Cursor::new(bytes), PipelineConfig::default());
        let mut consumer = RecordingConsumer::default();
        pipeline.run(&mut consumer);

        assert_eq!(consumer.headers, 1);
        assert_eq!(
            consumer.warnings,
            vec![Warning::UnrecognizedOptionalFeature("Some.Future.Optional.Thing".into())]
        );
        assert!(consumer.errors.is_empty());
        assert!(consumer.ended);
    }

    #[test]
    fn cancellation_before_run_yields_on_cancelled() {
        let header_body = string_field(4, "OsmSchema-V0.6");
        let bytes = frame("OSMHeader", &header_body);

        let pipeline = Pipeline::new(Cursor::new(bytes), PipelineConfig::default());
        pipeline.cancel_handle().cancel();
        let mut consumer = RecordingConsumer::default();
        pipeline.run(&mut consumer);

        assert_eq!(consumer.headers, 0);
        assert!(consumer.errors.is_empty());
    }
}
