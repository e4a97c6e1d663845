use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};

use crate::{auth::AuthError, chart::RenderError, gateway::FetchError};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

/// Failure of a single poll cycle. None of these stop the pipeline; the sink
/// logs them and waits for the next item.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("render error: {0}")]
    Render(#[from] RenderError),
}

impl PipelineError {
    /// Short label used for the `kind` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Fetch(_) => "fetch",
            Self::Validation(_) => "validation",
            Self::Render(_) => "render",
        }
    }
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<T>: Send + Sync {
    async fn apply(&self, input: Envelope<T>) -> Result<Envelope<T>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

/// Source → transforms → sink.
///
/// The stream is pulled by the sink one item at a time, so a source that
/// sleeps between items gets fixed-delay scheduling: the next fetch starts
/// only after the sink has finished with the previous reading.
pub struct Pipeline<S, T, K> {
    pub source: S,
    pub transforms: Vec<Arc<dyn Transform<T>>>,
    pub sink: K,
}

impl<T, S, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + 'static,
    K: Sink<T> + 'static,
{
    pub async fn run(self) -> Result<(), PipelineError> {
        let mut stream = self.source.stream().await;

        for t in self.transforms {
            stream = Box::pin(stream.then(move |item| {
                let t = t.clone();
                async move {
                    match item {
                        Ok(env) => t.apply(env).await,
                        Err(e) => Err(e),
                    }
                }
            }));
        }

        self.sink.run(stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct VecSource(Vec<Result<u32, PipelineError>>);

    #[async_trait::async_trait]
    impl Source<u32> for VecSource {
        async fn stream(&self) -> EnvelopeStream<u32> {
            let items: Vec<_> = self
                .0
                .iter()
                .map(|r| match r {
                    Ok(v) => Ok(Envelope::now(*v)),
                    Err(e) => Err(PipelineError::Validation(e.to_string())),
                })
                .collect();
            Box::pin(futures::stream::iter(items))
        }
    }

    struct Double;

    #[async_trait::async_trait]
    impl Transform<u32> for Double {
        async fn apply(&self, mut input: Envelope<u32>) -> Result<Envelope<u32>, PipelineError> {
            input.payload *= 2;
            Ok(input)
        }
    }

    #[derive(Default)]
    struct Collect {
        ok: Mutex<Vec<u32>>,
        errors: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl Sink<u32> for Arc<Collect> {
        async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
        where
            S: Stream<Item = Result<Envelope<u32>, PipelineError>> + Send + Unpin + 'static,
        {
            while let Some(item) = input.next().await {
                match item {
                    Ok(env) => self.ok.lock().unwrap().push(env.payload),
                    Err(_) => *self.errors.lock().unwrap() += 1,
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn transforms_apply_in_order_and_errors_pass_through() {
        let sink = Arc::new(Collect::default());
        let pipeline = Pipeline {
            source: VecSource(vec![
                Ok(1),
                Err(PipelineError::Validation("bad".to_string())),
                Ok(3),
            ]),
            transforms: vec![
                Arc::new(Double) as Arc<dyn Transform<u32>>,
                Arc::new(Double) as Arc<dyn Transform<u32>>,
            ],
            sink: sink.clone(),
        };

        pipeline.run().await.unwrap();

        assert_eq!(*sink.ok.lock().unwrap(), vec![4, 12]);
        assert_eq!(*sink.errors.lock().unwrap(), 1);
    }
}
