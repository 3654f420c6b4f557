#[tokio::main]
async fn main() {
    if let Err(err) = dramlog_lib::run().await {
        eprintln!("dramlog failed: {err:?}");
        std::process::exit(1);
    }
}
