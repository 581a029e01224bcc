use crate::RuntimeError;
use std::collections::BTreeMap;
use std::io::Read;

/// HTTP client for the `/infer` endpoint served by a running solver.
///
/// Solver containers publish their server on a host port bound to
/// `0.0.0.0`, so requests always go to the loopback address.
pub struct InferenceClient {
    host: String,
    agent: ureq::Agent,
}

impl Default for InferenceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceClient {
    pub fn new() -> Self {
        Self::with_host("127.0.0.1")
    }

    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    pub fn endpoint(&self, port: &str) -> String {
        format!("http://{}:{port}/infer", self.host)
    }

    /// POST `params` as a form to the solver and return the response body.
    pub fn infer(
        &self,
        port: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<String, RuntimeError> {
        let url = self.endpoint(port);
        tracing::debug!("POST {url} ({} params)", params.len());

        let resp = match self
            .agent
            .post(&url)
            .send_form(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RuntimeError::Inference(format!("HTTP {code} from {url}")));
            }
            Err(e) => return Err(RuntimeError::Inference(format!("{url}: {e}"))),
        };

        let mut body = String::new();
        resp.into_body()
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|e| RuntimeError::Inference(e.to_string()))?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// Serve one request, reply with `status` and echo the request body.
    fn one_shot_server(status: u16) -> (u16, thread::JoinHandle<(String, String)>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let handle = thread::spawn(move || {
            let mut req = server.recv().unwrap();
            let mut body = String::new();
            req.as_reader().read_to_string(&mut body).unwrap();
            let url = req.url().to_owned();
            let reply = format!("{{\"echo\":\"{body}\"}}");
            req.respond(tiny_http::Response::from_string(reply).with_status_code(status))
                .unwrap();
            (url, body)
        });
        (port, handle)
    }

    #[test]
    fn endpoint_targets_loopback() {
        assert_eq!(
            InferenceClient::new().endpoint("9000"),
            "http://127.0.0.1:9000/infer"
        );
    }

    #[test]
    fn infer_posts_form_and_returns_body() {
        let (port, server) = one_shot_server(200);
        let mut params = BTreeMap::new();
        params.insert("text".to_owned(), "hello".to_owned());
        params.insert("lang".to_owned(), "en".to_owned());

        let body = InferenceClient::new()
            .infer(&port.to_string(), &params)
            .unwrap();
        let (url, sent) = server.join().unwrap();

        assert_eq!(url, "/infer");
        assert_eq!(sent, "lang=en&text=hello");
        assert!(body.contains("lang=en&text=hello"));
    }

    #[test]
    fn error_status_is_reported() {
        let (port, server) = one_shot_server(500);
        let err = InferenceClient::new()
            .infer(&port.to_string(), &BTreeMap::new())
            .unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, RuntimeError::Inference(msg) if msg.contains("500")));
    }

    #[test]
    fn unreachable_solver_is_an_inference_error() {
        // Bind then drop to obtain a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = InferenceClient::new()
            .infer(&port.to_string(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Inference(_)));
    }
}
