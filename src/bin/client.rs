use anyhow::Context;
use clap::Parser;
use imcui_api::logging;
use imcui_api::services::client::{dump_preds, ApiClient, Preds};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "imcui-client")]
#[command(about = "Send images to the image matching API and decode the results")]
struct Cli {
    /// First image (the only one used for extraction)
    #[arg(long, value_name = "IMAGE")]
    image0: PathBuf,

    /// Second image, required with --match
    #[arg(long, value_name = "IMAGE")]
    image1: Option<PathBuf>,

    /// Number of requests to send
    #[arg(short = 'n', long, default_value_t = 1)]
    num_requests: usize,

    /// Match image0 against image1 instead of extracting features
    #[arg(long = "match")]
    match_pair: bool,

    /// Draw the extracted keypoints to demo_match.jpg
    #[arg(long, visible_alias = "viz")]
    visualize: bool,

    /// Where to dump the last result
    #[arg(long, value_name = "FILE", default_value = "preds.bin")]
    dump: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init("info", "pretty");

    let args = Cli::parse();
    let client = ApiClient::from_env()?;
    println!("API ENDPOINT: {}", client.base_url());

    match client.get_api_version().await {
        Ok(version) => println!("API VERSION: {}", version),
        Err(e) => eprintln!("An error occurred: {}", e),
    }

    let mut preds = None;
    let started = Instant::now();

    if args.match_pair {
        let image1 = args
            .image1
            .as_ref()
            .context("--image1 is required with --match")?;
        println!("Sending {} requests to {}", args.num_requests, client.match_url());
        println!("Image0: {}", args.image0.display());
        println!("Image1: {}", image1.display());

        for _ in 0..args.num_requests {
            let t = Instant::now();
            preds = client
                .send_request_match(&args.image0, image1)
                .await?
                .map(Preds::Match);
            println!("Time cost: {:?}", t.elapsed());
        }
    } else {
        println!("Sending {} requests to {}", args.num_requests, client.extract_url());
        println!("Image0: {}", args.image0.display());
        println!("Visualize: {}", args.visualize);

        for _ in 0..args.num_requests {
            let t = Instant::now();
            preds = client
                .send_request_extract(&args.image0, args.visualize)
                .await?
                .map(Preds::Extract);
            println!("Time cost: {:?}", t.elapsed());
        }
    }

    println!("Total time cost: {:?}", started.elapsed());

    let preds = preds.context("no result received from the server")?;
    dump_preds(&args.dump, &preds)?;
    println!("Results saved to {}", args.dump.display());
    println!("{:?}", preds.keys());

    Ok(())
}
