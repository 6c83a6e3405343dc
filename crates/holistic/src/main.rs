#[holistic::main]
fn main() -> anyhow::Result<()> {
    holistic::app::run()
}
