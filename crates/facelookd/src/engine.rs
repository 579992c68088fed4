use facelook_core::recognizer::RecognizeError;
use facelook_core::{FaceDetector, MatchResult, Recognizer};
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("recognition failed: {0}")]
    Recognize(#[from] RecognizeError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("recognition panicked: {0}")]
    Panicked(String),
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Recognize {
        encoded: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<MatchResult>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode an uploaded image and recognize every face in it.
    pub async fn recognize(&self, encoded: Vec<u8>) -> Result<Vec<MatchResult>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                encoded,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Move the recognizer onto a dedicated OS thread and return a handle.
///
/// Detection and matching are blocking and CPU-bound; the engine thread
/// serves requests one at a time in arrival order.
pub fn spawn_engine<D>(mut recognizer: Recognizer<D>) -> Result<EngineHandle, EngineError>
where
    D: FaceDetector + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facelook-engine".into())
        .spawn(move || {
            tracing::info!(entries = recognizer.database().len(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize { encoded, reply } => {
                        // A panic in decode or inference fails this request only.
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            run_recognize(&mut recognizer, &encoded)
                        }))
                        .unwrap_or_else(|payload| {
                            let message = panic_message(payload.as_ref());
                            tracing::error!(%message, "recognize: panicked");
                            Err(EngineError::Panicked(message))
                        });
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_recognize<D: FaceDetector>(
    recognizer: &mut Recognizer<D>,
    encoded: &[u8],
) -> Result<Vec<MatchResult>, EngineError> {
    let image = image::load_from_memory(encoded)?.to_rgb8();
    let started = std::time::Instant::now();
    let results = recognizer.recognize(&image)?;
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        faces = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "recognize: done"
    );
    Ok(results)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelook_core::detector::DetectorError;
    use facelook_core::{Detection, ReferenceDatabase, RelativeBox};
    use image::RgbImage;

    /// Panics on images wider than they are tall, finds one face otherwise.
    struct PanicsOnWide;

    impl FaceDetector for PanicsOnWide {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
            assert!(image.width() <= image.height(), "wide frame");
            Ok(vec![Detection {
                bbox: RelativeBox { xmin: 0.0, ymin: 0.0, width: 1.0, height: 1.0 },
                confidence: 0.9,
            }])
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbImage::new(width, height)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn test_engine_survives_panicking_request() {
        let engine = spawn_engine(Recognizer::new(PanicsOnWide, ReferenceDatabase::default()))
            .unwrap();

        let err = engine.recognize(png(8, 4)).await.unwrap_err();
        match err {
            EngineError::Panicked(message) => assert!(message.contains("wide frame")),
            other => panic!("unexpected error: {other}"),
        }

        let results = engine.recognize(png(4, 4)).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_engine_reports_decode_errors() {
        let engine = spawn_engine(Recognizer::new(PanicsOnWide, ReferenceDatabase::default()))
            .unwrap();
        let err = engine.recognize(b"not an image".to_vec()).await.unwrap_err();
        assert!(matches!(err, EngineError::Decode(_)));
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 7");
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }
}
