use axum::{
    body::{box_body, Body, BoxBody},
    http::{Request, Response},
};
use futures::future::BoxFuture;
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use std::sync::Arc;
use tower::Service;

/// Keyed rate limit on mutating and reading traffic alike. The key is the
/// authenticated uid when a bearer token is present, otherwise the client
/// address from `x-forwarded-for`.
#[derive(Clone)]
pub struct RateLimiterMiddleware<S> {
    rate_limiter: Arc<RateLimiter<String, DashMapStateStore<String>, DefaultClock>>,
    inner: S,
    quota: Quota,
}

impl<S> RateLimiterMiddleware<S> {
    pub fn new(inner: S, quota: Quota) -> Self {
        RateLimiterMiddleware {
            rate_limiter: Arc::new(RateLimiter::dashmap(quota)),
            inner,
            quota,
        }
    }
}

fn limiter_key<B>(req: &Request<B>) -> String {
    if let Some(auth) = req.headers().get("authorization") {
        if let Ok(value) = auth.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return format!("user:{}", token);
            }
        }
    }

    let ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|d| d.to_str().ok())
        .unwrap_or("unknown");
    format!("ip:{}", ip)
}

impl<S, ReqBody> Service<Request<ReqBody>> for RateLimiterMiddleware<S>
where
    S: Service<Request<ReqBody>, Response = Response<BoxBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response<BoxBody>;

    type Error = S::Error;

    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // https://github.com/tower-rs/tower/issues/547
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let rate_limiter = self.rate_limiter.clone();
        let quota = self.quota;

        Box::pin(async move {
            let key = limiter_key(&req);

            if rate_limiter.check_key(&key).is_err() {
                let res = Response::builder()
                    .status(429)
                    .body(box_body(Body::from(format!(
                        "Too many requests. {:?}",
                        quota
                    ))))
                    .expect("Couldn't build body.");

                tracing::warn!(%key, "Rate limited.");

                return Ok(res);
            }

            let res = inner.call(req).await?;

            Ok(res)
        })
    }
}
