use submerge::run_demo;
use submerge_txn::Config;
use tracing_subscriber::EnvFilter;

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .without_time()
        .try_init();

    let outcome =
        run_demo(vec!["account/1"], vec!["account/2", "account/3"], 2, Config::default(), 0xC0FFEE);

    tracing::info!(
        target: "submerge",
        committer = ?outcome.committer,
        preventers = ?outcome.preventers,
        "transaction finished"
    );
}
