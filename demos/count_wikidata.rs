use std::fs::File;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{error, info, warn};

use pbf_pipeline::block::{Node, Relation, Way};
use pbf_pipeline::error::{Error, Warning};
use pbf_pipeline::{Consumer, HeaderBlock, Pipeline, PipelineConfig};

static WIKIDATA_COUNT: AtomicUsize = AtomicUsize::new(0);

fn count_tag(key: &str) {
    if key == "wikidata" {
        WIKIDATA_COUNT.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct WikidataConsumer;

impl Consumer for WikidataConsumer {
    fn on_header(&mut self, header: &HeaderBlock) {
        if let Some(writing_program) = &header.writing_program {
            info!("writing program: {writing_program}");
        }
    }

    fn on_node(&mut self, node: &Node) {
        for tag in node.tags() {
            match tag {
                Ok((key, _value)) => count_tag(key),
                Err(error) => error!("malformed node tag: {error}"),
            }
        }
    }

    fn on_way(&mut self, way: &Way) {
        for tag in way.tags() {
            match tag {
                Ok((key, _value)) => count_tag(key),
                Err(error) => error!("malformed way tag: {error}"),
            }
        }
    }

    fn on_relation(&mut self, relation: &Relation) {
        for tag in relation.tags() {
            match tag {
                Ok((key, _value)) => count_tag(key),
                Err(error) => error!("malformed relation tag: {error}"),
            }
        }
    }

    fn on_warning(&mut self, warning: Warning) {
        warn!("{warning:?}");
    }

    fn on_error(&mut self, error: &Error, index: Option<u64>) {
        error!("error decoding frame {index:?}: {error}");
    }
}

fn main() {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(log::LevelFilter::Info);
    builder.init();

    let mut args = std::env::args();

    let pbf_path = args.nth(1).expect("expected an OSM PBF file as first argument");

    let max_workers: usize = match args.next() {
        Some(s) => s.parse().expect("expected a worker count as second argument"),
        None => PipelineConfig::default().max_workers,
    };

    let file = File::open(pbf_path).expect("failed to open input file");

    let start = std::time::Instant::now();

    let config = PipelineConfig {
        max_workers,
        in_flight_bound: 2 * max_workers.max(1),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(file, config);
    let mut consumer = WikidataConsumer;
    pipeline.run(&mut consumer);

    info!("wikidata tag count: {}", WIKIDATA_COUNT.load(Ordering::SeqCst));
    info!("finished in {:.2}s on up to {} worker(s)", start.elapsed().as_secs_f64(), max_workers);
}
