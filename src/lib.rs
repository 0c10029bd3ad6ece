//! A parallel, backpressured reader for OpenStreetMap PBF files.
//!
//! An OSM PBF file is a sequence of independently-compressible blobs, each
//! carrying a packed, delta-encoded description of thousands of nodes,
//! ways, or relations. [`Pipeline`] drives the whole read: it frames the
//! byte stream, fans decompression out across a bounded [`WorkerPool`],
//! restores file order, and decodes each block's entities directly from
//! the still-compressed buffer — no intermediate prost-style message
//! objects are built along the way — onto whatever [`Consumer`] you give
//! it.
//!
//! ```no_run
//! use pbf_pipeline::{Consumer, Pipeline, PipelineConfig};
//! use pbf_pipeline::block::{Node, Way, Relation};
//! use pbf_pipeline::header::HeaderBlock;
//! use pbf_pipeline::error::{Error, Warning};
//!
//! struct CountingConsumer(u64);
//!
//! impl Consumer for CountingConsumer {
//!     fn on_header(&mut self, _header: &HeaderBlock) {}
//!     fn on_node(&mut self, _node: &Node) { self.0 += 1; }
//!     fn on_way(&mut self, _way: &Way) {}
//!     fn on_relation(&mut self, _relation: &Relation) {}
//!     fn on_warning(&mut self, _warning: Warning) {}
//!     fn on_end(&mut self) {}
//!     fn on_error(&mut self, _error: &Error, _index: Option<u64>) {}
//!     fn on_cancelled(&mut self) {}
//! }
//!
//! let file = std::fs::File::open("extract.osm.pbf").unwrap();
//! let pipeline = Pipeline::new(file, PipelineConfig::default());
//! let mut consumer = CountingConsumer(0);
//! pipeline.run(&mut consumer);
//! ```
//!
//! # Links
//!
//! - [OSM PBF format documentation](https://wiki.openstreetmap.org/wiki/PBF_Format)

#![forbid(unsafe_code)]

pub mod block;
pub mod codec;
pub mod error;
pub mod frame;
pub mod header;
pub mod pipeline;
pub mod pool;
pub mod stringtable;
pub mod util;
pub mod varint;
pub mod wire;

pub use block::{Member, MemberType, Node, Relation, Way};
pub use error::{Error, Warning};
pub use header::HeaderBlock;
pub use pipeline::{CancelHandle, Pipeline, PipelineConfig};
pub use pool::Priority;

/// The upstream collaborator a [`Pipeline`] drives. Every callback borrows
/// structures owned by the decoder: references are valid only for the
/// duration of the call and must not be retained past it.
///
/// Callbacks execute on the pipeline's single orchestrator task — never
/// concurrently with one another for the same run — so implementations
/// don't need interior synchronization purely on `Pipeline`'s account.
pub trait Consumer {
    /// Called once, for the file's `OSMHeader` frame, before any entity.
    /// No-op by default — most consumers only care about entities.
    fn on_header(&mut self, header: &HeaderBlock) {
        let _ = header;
    }

    /// Called for each node, dense or sparse, in file order.
    fn on_node(&mut self, node: &Node);

    /// Called for each way, in file order.
    fn on_way(&mut self, way: &Way);

    /// Called for each relation, in file order.
    fn on_relation(&mut self, relation: &Relation);

    /// A non-fatal condition worth surfacing but not worth aborting for.
    /// No-op by default.
    fn on_warning(&mut self, warning: Warning) {
        let _ = warning;
    }

    /// Called once the whole stream has been consumed with no error and
    /// no cancellation. No-op by default.
    fn on_end(&mut self) {}

    /// Called at most once, in place of [`Consumer::on_end`], when a
    /// terminal error stops the pipeline. `index` is the frame index the
    /// error is attributed to, when known.
    fn on_error(&mut self, error: &Error, index: Option<u64>);

    /// Called in place of [`Consumer::on_end`] when the run was stopped
    /// via a [`CancelHandle`] rather than running to completion. No-op by
    /// default.
    fn on_cancelled(&mut self) {}
}
