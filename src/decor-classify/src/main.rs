use std::error::Error;
use std::path::PathBuf;
use structopt::StructOpt;

use log::info;

use decor_serve::ImageClassifier;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "decor-classify",
    about = "CLI app to classify an image as content or decorative"
)]
struct CmdArgs {
    #[structopt(help = "Export directory of the classifier SavedModel")]
    export_dir: String,

    #[structopt(help = "Path of the image file to classify")]
    image_path: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = CmdArgs::from_args();

    let export_dir = PathBuf::from(args.export_dir);
    let image_path = PathBuf::from(args.image_path);

    let classifier = ImageClassifier::new(&export_dir)?;

    let classification = classifier.classify_file(&image_path)?;

    info!("classified {} as {}", image_path.display(), classification.label);
    println!("{}", serde_json::to_string(&classification)?);

    Ok(())
}
