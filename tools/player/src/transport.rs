use crate::context::CallContext;
use crate::errors::PlayerError;
use crate::exchange::{RequestDescriptor, ResponseDescriptor};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Live network capability. Any error is fatal to the call that issued it.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &RequestDescriptor,
        ctx: &CallContext,
    ) -> Result<ResponseDescriptor, PlayerError>;
}

#[derive(Default, Clone)]
pub struct FakeTransport {
    responses: Arc<Mutex<VecDeque<Result<ResponseDescriptor, PlayerError>>>>,
    sent: Arc<Mutex<Vec<RequestDescriptor>>>,
}

impl FakeTransport {
    pub fn push_response(&self, response: Result<ResponseDescriptor, PlayerError>) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(response);
    }

    pub fn push_ok(&self, status: u16, body: &str) {
        self.push_response(Ok(ResponseDescriptor::new(status).with_body(body)));
    }

    pub fn sent(&self) -> Vec<RequestDescriptor> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn sent_urls(&self) -> Vec<String> {
        self.sent().into_iter().map(|req| req.url).collect()
    }

    pub fn pending(&self) -> usize {
        self.responses.lock().expect("responses lock").len()
    }
}

impl Transport for FakeTransport {
    fn send(
        &self,
        request: &RequestDescriptor,
        ctx: &CallContext,
    ) -> Result<ResponseDescriptor, PlayerError> {
        ctx.check(&format!("send {} {}", request.method, request.url))?;
        self.sent.lock().expect("sent lock").push(request.clone());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(PlayerError::Transport(
                    "no fake response queued".to_string(),
                ))
            })
    }
}

#[cfg(feature = "http")]
pub use self::http::ReqwestTransport;

#[cfg(feature = "http")]
mod http {
    use super::Transport;
    use crate::context::CallContext;
    use crate::errors::PlayerError;
    use crate::exchange::{RequestDescriptor, ResponseDescriptor};
    use reqwest::blocking::Client;
    use reqwest::Method;

    /// Blocking reqwest client. The call deadline becomes the request timeout.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Result<Self, PlayerError> {
            let client = Client::builder()
                .build()
                .map_err(|e| PlayerError::Transport(e.to_string()))?;
            Ok(Self { client })
        }

        pub fn with_client(client: Client) -> Self {
            Self { client }
        }
    }

    impl Transport for ReqwestTransport {
        fn send(
            &self,
            request: &RequestDescriptor,
            ctx: &CallContext,
        ) -> Result<ResponseDescriptor, PlayerError> {
            ctx.check(&format!("send {} {}", request.method, request.url))?;
            let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| {
                PlayerError::InvalidRequest(format!("method {:?}: {e}", request.method))
            })?;
            let mut builder = self.client.request(method, request.url.as_str());
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(remaining) = ctx.remaining() {
                builder = builder.timeout(remaining);
            }
            let response = builder
                .body(request.body.clone())
                .send()
                .map_err(|e| PlayerError::Transport(e.to_string()))?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).to_string(),
                    )
                })
                .collect();
            let body = response
                .bytes()
                .map_err(|e| PlayerError::Transport(e.to_string()))?
                .to_vec();
            Ok(ResponseDescriptor {
                status,
                headers,
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FakeTransport, Transport};
    use crate::context::{CallContext, CancelFlag};
    use crate::errors::PlayerError;
    use crate::exchange::RequestDescriptor;

    #[test]
    fn fake_returns_queued_responses_in_order_and_records_requests() {
        let fake = FakeTransport::default();
        fake.push_ok(200, "first");
        fake.push_response(Err(PlayerError::Transport("connection reset".to_string())));

        let req = RequestDescriptor::new("GET", "https://example.com/a");
        let first = fake.send(&req, &CallContext::none()).expect("first");
        assert_eq!(first.body_text(), "first");
        assert_eq!(
            fake.send(&req, &CallContext::none()),
            Err(PlayerError::Transport("connection reset".to_string()))
        );
        assert!(matches!(
            fake.send(&req, &CallContext::none()),
            Err(PlayerError::Transport(_))
        ));
        assert_eq!(fake.sent().len(), 3);
    }

    #[test]
    fn fake_honours_cancellation_before_sending() {
        let fake = FakeTransport::default();
        fake.push_ok(200, "unused");
        let flag = CancelFlag::new();
        flag.cancel();
        let ctx = CallContext::none().with_cancel(flag);
        let req = RequestDescriptor::new("GET", "https://example.com/a");
        assert!(matches!(
            fake.send(&req, &ctx),
            Err(PlayerError::Cancelled(_))
        ));
        assert!(fake.sent().is_empty());
        assert_eq!(fake.pending(), 1);
    }
}
