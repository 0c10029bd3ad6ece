use std::fs::File;

use pbf_pipeline::block::{Node, Relation, Way};
use pbf_pipeline::error::{Error, Warning};
use pbf_pipeline::{Consumer, HeaderBlock, Pipeline, PipelineConfig};

#[derive(Default)]
struct PrintHeaderConsumer {
    printed: bool,
}

impl Consumer for PrintHeaderConsumer {
    fn on_header(&mut self, header: &HeaderBlock) {
        println!("{header:#?}");
        self.printed = true;
    }

    fn on_node(&mut self, _node: &Node) {}
    fn on_way(&mut self, _way: &Way) {}
    fn on_relation(&mut self, _relation: &Relation) {}

    fn on_error(&mut self, error: &Error, index: Option<u64>) {
        eprintln!("error at frame {index:?}: {error}");
    }

    fn on_warning(&mut self, warning: Warning) {
        eprintln!("warning: {warning:?}");
    }
}

fn main() {
    let pbf_path = std::env::args().nth(1).expect("expected an OSM PBF file as first argument");
    let file = File::open(pbf_path).expect("failed to open input file");

    let pipeline = Pipeline::new(file, PipelineConfig::default());
    let mut consumer = PrintHeaderConsumer::default();
    pipeline.run(&mut consumer);

    if !consumer.printed {
        eprintln!("file ended without an OSMHeader frame");
    }
}
