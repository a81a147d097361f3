use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use log::{debug, info};
use serde::Serialize;
use tensorflow::{
    Code, Graph, SavedModelBundle, Session, SessionOptions, SessionRunArgs, Status, Tensor,
};

/// Model input resolution, fixed by the exported network topology.
const INPUT_SIZE: u32 = 224;

/// Per-channel normalization constants the network was trained with.
const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Signature names of the SavedModel's serving entry point.
const SERVING_INPUT: &str = "serving_default_input_1";
const SERVING_OUTPUT: &str = "StatefulPartitionedCall";

pub struct StageTimer {
    stage: &'static str,
    started: DateTime<Utc>,
}

impl StageTimer {
    /// Start timing a pipeline stage
    pub fn start(stage: &'static str) -> Self {
        debug!("{}: starting", stage);

        StageTimer {
            stage,
            started: Utc::now(),
        }
    }

    /// Stop the timer, logging and returning the elapsed time in milliseconds
    pub fn finish(self) -> i64 {
        let elapsed = (Utc::now() - self.started).num_milliseconds();
        info!("{} duration: {} msec", self.stage, elapsed);
        elapsed
    }
}

/// Binary classification label for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Content,
    Decorative,
}

impl Label {
    /// Threshold the sigmoid-activated score at 0.5.
    fn from_score(probability: f32) -> Self {
        if probability > 0.5 {
            Label::Content
        } else {
            Label::Decorative
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Label::Content => f.write_str("content"),
            Label::Decorative => f.write_str("decorative"),
        }
    }
}

pub struct ImageClassifier {
    /// TensorFlow model graph
    graph: Graph,

    /// TensorFlow session
    session: Session,
}

#[derive(Debug, Serialize)]
pub struct Classification {
    /// Classification label of the image
    pub label: Label,

    /// Sigmoid-activated classification score
    pub probability: f32,

    /// Time spent loading image in memory
    pub time_image_load: i64,

    /// Time resizing image
    pub time_image_resize: i64,

    /// Time spent on running session
    pub time_session_run: i64,
}

impl ImageClassifier {
    pub fn new(export_dir: &Path) -> tensorflow::Result<Self> {
        let t = StageTimer::start("Loading session");

        let mut graph = Graph::new();
        let session =
            SavedModelBundle::load(&SessionOptions::new(), &["serve"], &mut graph, export_dir)?
                .session;

        t.finish();

        Ok(ImageClassifier { graph, session })
    }

    pub fn run(&self, pixels: &[f32]) -> tensorflow::Result<Classification> {
        let t = StageTimer::start("Running session");

        let input = Tensor::new(&[1, INPUT_SIZE as u64, INPUT_SIZE as u64, 3])
            .with_values(pixels)?;

        let mut args = SessionRunArgs::new();

        args.add_feed(
            &self.graph.operation_by_name_required(SERVING_INPUT)?,
            0,
            &input,
        );

        let result = args.request_fetch(
            &self.graph.operation_by_name_required(SERVING_OUTPUT)?,
            0,
        );

        self.session.run(&mut args)?;
        let output: Tensor<f32> = args.fetch(result)?;

        let logit = output
            .iter()
            .next()
            .copied()
            .ok_or_else(|| Status::new_set_lossy(Code::Internal, "Model produced no output"))?;
        let probability = sigmoid(logit);

        let time_session_run = t.finish();

        Ok(Classification {
            label: Label::from_score(probability),
            probability,
            time_image_load: 0,
            time_image_resize: 0,
            time_session_run,
        })
    }

    pub fn classify(&self, image: &DynamicImage) -> tensorflow::Result<Classification> {
        let t = StageTimer::start("Resizing image");

        let pixels = preprocess(image);

        let time_image_resize = t.finish();

        let mut classification = self.run(&pixels)?;
        classification.time_image_resize = time_image_resize;

        Ok(classification)
    }

    pub fn classify_file(&self, path: &Path) -> tensorflow::Result<Classification> {
        let t = StageTimer::start("Loading image from file");

        let image = image::open(path)
            .map_err(|err| Status::new_set_lossy(Code::InvalidArgument, &err.to_string()))?;

        let time_image_load = t.finish();

        let mut classification = self.classify(&image)?;
        classification.time_image_load = time_image_load;

        Ok(classification)
    }
}

/// Force 3-channel RGB, resize to the model resolution and normalize each
/// channel with the fixed training constants. Output is interleaved HWC.
fn preprocess(image: &DynamicImage) -> Vec<f32> {
    let rgb = image.to_rgb();

    let resized =
        image::imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);

    resized
        .into_raw()
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let channel = i % 3;
            (*value as f32 / 255f32 - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel]
        })
        .collect()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
