use seam::phantom;
use seam::settings::{self};
use seam::workflow::JunctionPlan;

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let settings = settings::load_config().unwrap();
    let kernel = phantom::demo_session(&settings);
    let mut plan = JunctionPlan::new(kernel, settings);

    plan.run().unwrap();
    plan.writeup();
}
