use facetrack_core::{
    recognize, EncodingRegistry, Encoding, ExtractError, Extractor, MeanConfidenceMatcher,
    Recognition,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Extract {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Option<Encoding>, ExtractError>>,
    },
    Recognize {
        registry: Arc<EncodingRegistry>,
        threshold: f32,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Recognition, ExtractError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Encode one enrollment image. `Ok(None)` when it holds no usable face.
    pub async fn extract(&self, image: Vec<u8>) -> Result<Option<Encoding>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Encode `image` and match it against a registry snapshot.
    pub async fn recognize(
        &self,
        registry: Arc<EncodingRegistry>,
        threshold: f32,
        image: Vec<u8>,
    ) -> Result<Recognition, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                registry,
                threshold,
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The extractor is owned by that thread for its whole lifetime; inference
/// requests are handled one at a time in arrival order.
pub fn spawn_engine(extractor: Box<dyn Extractor + Send>) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let mut extractor = extractor;

    std::thread::Builder::new()
        .name("facetrack-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { image, reply } => {
                        let result = extractor.extract(&image);
                        if let Err(e) = &result {
                            tracing::warn!(error = %e, bytes = image.len(), "extract failed");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize {
                        registry,
                        threshold,
                        image,
                        reply,
                    } => {
                        let matcher = MeanConfidenceMatcher::new(threshold);
                        let result = recognize(&mut extractor, &image, &registry, &matcher);
                        match &result {
                            Ok(r) => tracing::debug!(
                                detected = r.detected(),
                                matched = r.result().matched,
                                "recognize finished"
                            ),
                            Err(e) => tracing::warn!(error = %e, "recognize failed"),
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
