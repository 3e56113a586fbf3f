use crate::path::metric_path;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::FutureExt;
use http::Request;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::{Registry, Unit};
use tokio::time::Instant;
use tower::{Layer, Service};

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct RequestLabels {
    pub verb: String,
    pub endpoint: String,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct ResponseLabels {
    pub verb: String,
    pub status_code: String,
}

/// Tower layer recording latency and response codes for every Kubernetes
/// API request, with names collapsed out of the endpoint label.
pub struct HttpMetricsLayer {
    duration: Family<RequestLabels, Histogram>,
    responses: Family<ResponseLabels, Counter>,
}

impl HttpMetricsLayer {
    pub fn new(registry: &mut Registry) -> Self {
        let duration = Family::<RequestLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.005, 0.025, 0.1, 0.5, 1., 5.].into_iter())
        });
        let responses = Family::<ResponseLabels, Counter>::default();

        registry.register_with_unit(
            "kubernetes_client_request_duration",
            "Latency of the Kubernetes client's requests by verb and endpoint.",
            Unit::Seconds,
            duration.clone(),
        );
        registry.register(
            "kubernetes_client_responses",
            "Kubernetes client responses by verb and status code.",
            responses.clone(),
        );

        Self {
            duration,
            responses,
        }
    }
}

impl<S> Layer<S> for HttpMetricsLayer {
    type Service = HttpMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpMetricsService {
            inner,
            duration: self.duration.clone(),
            responses: self.responses.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpMetricsService<S> {
    inner: S,
    duration: Family<RequestLabels, Histogram>,
    responses: Family<ResponseLabels, Counter>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for HttpMetricsService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let verb = req.method().as_str().to_string();
        let labels = RequestLabels {
            verb: verb.clone(),
            endpoint: metric_path(req.uri().path()),
        };

        let start_time = Instant::now();

        let fut = self.inner.call(req);
        let duration = self.duration.clone();
        let responses = self.responses.clone();
        async move {
            let result = fut.await;
            duration
                .get_or_create(&labels)
                .observe(start_time.elapsed().as_secs_f64());
            if let Ok(ref response) = result {
                responses
                    .get_or_create(&ResponseLabels {
                        verb,
                        status_code: response.status().as_u16().to_string(),
                    })
                    .inc();
            }
            result
        }
        .boxed()
    }
}
