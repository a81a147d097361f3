use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;
use url::form_urlencoded;

use decor_serve::ImageClassifier;

const MISSING_PARAM_BODY: &str = "Missing ?image=path parameter.";
const NOT_FOUND_BODY: &str = "Image not found.";

#[derive(StructOpt, Debug)]
#[structopt(
    name = "decor-http",
    about = "HTTP endpoint classifying images as content or decorative"
)]
struct CmdArgs {
    #[structopt(help = "Export directory of the classifier SavedModel", default_value = "model")]
    export_dir: String,
}

/// Pull the `image` query parameter, percent-decoded, if present.
fn image_param(query: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes()).find_map(|(key, value)| {
        if key == "image" {
            Some(value.into_owned())
        } else {
            None
        }
    })
}

#[derive(Debug, PartialEq)]
enum Route {
    MissingParam,
    NotFound,
    Classify(PathBuf),
}

fn route(query: Option<&str>) -> Route {
    match query.and_then(image_param) {
        None => Route::MissingParam,
        Some(path) => {
            let path = PathBuf::from(path);
            if path.exists() {
                Route::Classify(path)
            } else {
                Route::NotFound
            }
        }
    }
}

async fn handle(
    req: Request<Body>,
    classifier: Arc<ImageClassifier>,
) -> Result<Response<Body>, Infallible> {
    let response = match route(req.uri().query()) {
        Route::MissingParam => Response::builder()
            .status(400)
            .body(Body::from(MISSING_PARAM_BODY)),
        Route::NotFound => Response::builder()
            .status(404)
            .body(Body::from(NOT_FOUND_BODY)),
        Route::Classify(path) => {
            // Pipeline failures stay under 200 with an error-prefixed body.
            let body = match classifier.classify_file(&path) {
                Ok(classification) => classification.label.to_string(),
                Err(err) => format!("error: {}", err),
            };

            Response::builder().status(200).body(Body::from(body))
        }
    };

    Ok(response.unwrap())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = CmdArgs::from_args();

    let export_dir = PathBuf::from(args.export_dir);
    let classifier = Arc::new(ImageClassifier::new(&export_dir)?);

    // A `MakeService` that produces a `Service` to handle each connection.
    let make_service = make_service_fn(move |_conn: &AddrStream| {
        let class = Arc::clone(&classifier);

        let service = service_fn(move |req| handle(req, class.clone()));

        async move { Ok::<_, Infallible>(service) }
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], 59192));

    let server = Server::bind(&addr).serve(make_service);

    println!("Server listening on http://{}", addr);

    server.await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_image_param() {
        assert_eq!(
            image_param("image=/tmp/photo.jpg"),
            Some("/tmp/photo.jpg".to_string())
        );
    }

    #[test]
    fn decodes_percent_encoded_paths() {
        assert_eq!(
            image_param("image=%2Ftmp%2Fmy%20photo.jpg"),
            Some("/tmp/my photo.jpg".to_string())
        );
    }

    #[test]
    fn ignores_other_params() {
        assert_eq!(image_param("img=/tmp/photo.jpg"), None);
        assert_eq!(image_param(""), None);
    }

    #[test]
    fn first_image_param_wins() {
        assert_eq!(image_param("image=a.png&image=b.png"), Some("a.png".to_string()));
    }

    #[test]
    fn no_query_routes_to_missing_param() {
        assert_eq!(route(None), Route::MissingParam);
        assert_eq!(route(Some("img=x.png")), Route::MissingParam);
    }

    #[test]
    fn nonexistent_path_routes_to_not_found() {
        assert_eq!(
            route(Some("image=/nonexistent.png")),
            Route::NotFound
        );
    }

    #[test]
    fn existing_path_routes_to_classification() {
        let path = std::env::temp_dir().join("decor-http-route-test.bin");
        std::fs::write(&path, b"not an image").unwrap();

        let query = format!("image={}", path.display());
        assert_eq!(route(Some(&query)), Route::Classify(path.clone()));

        std::fs::remove_file(&path).unwrap();
    }
}
