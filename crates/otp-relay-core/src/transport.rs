//! HTTP port and the redirect-following request primitive.
//!
//! Adapters execute exactly one request per call and must not follow redirects
//! themselves; [`send_following_redirects`] applies the same-origin and hop-limit
//! policy and carries the session cookie across hops.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::{errors::Error, session::SESSION_COOKIE_NAME, Result};

/// Upper bound on redirect hops for a single logical request.
pub const MAX_REDIRECTS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    /// Form-encoded body for POST requests.
    pub form: Option<Vec<(String, String)>>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Vec::new(),
            form: None,
        }
    }

    pub fn post_form(url: Url, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url,
            headers: Vec::new(),
            form: Some(form),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value.into());
        self
    }

    fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value));
    }
}

#[derive(Clone, Debug, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// Header name/value pairs; repeated headers (e.g. `Set-Cookie`) appear once per value.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).next()
    }

    pub fn header_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let name = name.to_owned();
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(&name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// Hexagonal port for a single HTTP exchange.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, req: &HttpRequest) -> Result<HttpResponse>;
}

/// Outcome of a request after all redirects were followed.
#[derive(Clone, Debug)]
pub struct FollowedResponse {
    pub status: u16,
    pub body: String,
    pub final_url: Url,
    pub redirected: bool,
    /// Latest session cookie (`NAME=value`) seen or sent along the chain.
    pub cookie: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RedirectPolicy {
    pub origin: Url,
    pub max_hops: usize,
}

impl RedirectPolicy {
    pub fn same_origin(origin: Url) -> Self {
        Self {
            origin,
            max_hops: MAX_REDIRECTS,
        }
    }

    /// Resolve `location` against `current` and refuse anything off the dashboard host.
    pub fn resolve(&self, current: &Url, location: &str) -> Result<Url> {
        let location = location.trim();
        if location.is_empty() {
            return Err(Error::Fetch("redirect without a location".to_string()));
        }
        let target = current
            .join(location)
            .map_err(|e| Error::InvalidUrl(format!("{location}: {e}")))?;

        if target.host_str() != self.origin.host_str() {
            return Err(Error::CrossOriginRedirect {
                host: target.host_str().unwrap_or_default().to_string(),
            });
        }
        Ok(target)
    }
}

/// Execute `req`, following redirects under `policy` and threading the session cookie.
pub async fn send_following_redirects(
    transport: &dyn HttpTransport,
    policy: &RedirectPolicy,
    mut req: HttpRequest,
    mut cookie: Option<String>,
) -> Result<FollowedResponse> {
    let mut hops = 0usize;
    loop {
        if let Some(c) = &cookie {
            req.set_header("Cookie", c.clone());
        }

        let resp = transport.execute(&req).await?;

        if let Some(fresh) = extract_session_cookie(&resp) {
            cookie = Some(fresh);
        }

        if !resp.is_redirect() {
            return Ok(FollowedResponse {
                status: resp.status,
                body: resp.body,
                final_url: req.url,
                redirected: hops > 0,
                cookie,
            });
        }

        hops += 1;
        if hops > policy.max_hops {
            return Err(Error::TooManyRedirects { hops });
        }

        let location = resp.header("location").unwrap_or_default();
        let next = policy.resolve(&req.url, location)?;
        debug!(status = resp.status, from = %req.url, to = %next, "following redirect");

        req.url = next;
        if !matches!(resp.status, 307 | 308) {
            req.method = Method::Get;
            req.form = None;
            req.headers
                .retain(|(n, _)| !n.eq_ignore_ascii_case("content-type"));
        }
    }
}

fn session_cookie_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(&format!("{SESSION_COOKIE_NAME}=([^;]+)")).expect("valid regex")
    })
}

/// `NAME=value` of the session cookie from the response's `Set-Cookie` headers.
pub fn extract_session_cookie(resp: &HttpResponse) -> Option<String> {
    resp.header_values("set-cookie")
        .filter_map(|v| session_cookie_re().captures(v))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|v| !v.is_empty() && *v != "deleted")
        .last()
        .map(|v| format!("{SESSION_COOKIE_NAME}={v}"))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn origin() -> Url {
        Url::parse("http://185.2.83.39/").unwrap()
    }

    fn login_url() -> Url {
        Url::parse("http://185.2.83.39/ints/signin").unwrap()
    }

    #[test]
    fn relative_and_root_relative_locations_resolve_against_current_url() {
        let p = RedirectPolicy::same_origin(origin());
        assert_eq!(
            p.resolve(&login_url(), "./").unwrap().as_str(),
            "http://185.2.83.39/ints/"
        );
        assert_eq!(
            p.resolve(&login_url(), "agent/SMSDashboard").unwrap().as_str(),
            "http://185.2.83.39/ints/agent/SMSDashboard"
        );
        assert_eq!(
            p.resolve(&login_url(), "/ints/login").unwrap().as_str(),
            "http://185.2.83.39/ints/login"
        );
        assert_eq!(
            p.resolve(&login_url(), "http://185.2.83.39/ints/x?y=1")
                .unwrap()
                .as_str(),
            "http://185.2.83.39/ints/x?y=1"
        );
    }

    #[tokio::test]
    async fn cross_origin_redirect_is_refused_without_following() {
        let transport = ScriptedTransport::new(vec![
            redirect("https://evil.example/steal"),
            ok("never fetched"),
        ]);
        let err = send_following_redirects(
            &transport,
            &RedirectPolicy::same_origin(origin()),
            HttpRequest::get(login_url()),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::CrossOriginRedirect { host } if host == "evil.example"));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn redirect_loop_is_bounded() {
        let script = (0..10).map(|_| redirect("/ints/signin")).collect();
        let transport = ScriptedTransport::new(script);
        let err = send_following_redirects(
            &transport,
            &RedirectPolicy::same_origin(origin()),
            HttpRequest::get(login_url()),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::TooManyRedirects { hops } if hops == MAX_REDIRECTS + 1));
        assert_eq!(transport.requests().len(), MAX_REDIRECTS + 1);
    }

    #[tokio::test]
    async fn post_redirect_becomes_get_and_carries_issued_cookie() {
        let transport = ScriptedTransport::new(vec![
            with_cookie(redirect("./agent/SMSDashboard"), "fresh"),
            ok("<h1>SMSDashboard</h1>"),
        ]);
        let req = HttpRequest::post_form(login_url(), vec![("a".into(), "b".into())])
            .header("Content-Type", "application/x-www-form-urlencoded");

        let out = send_following_redirects(
            &transport,
            &RedirectPolicy::same_origin(origin()),
            req,
            Some("PHPSESSID=old".to_string()),
        )
        .await
        .unwrap();

        assert!(out.redirected);
        assert_eq!(out.final_url.path(), "/ints/agent/SMSDashboard");
        assert_eq!(out.cookie.as_deref(), Some("PHPSESSID=fresh"));

        let reqs = transport.requests();
        assert_eq!(header_of(&reqs[0], "cookie"), Some("PHPSESSID=old"));
        assert_eq!(reqs[1].method, Method::Get);
        assert!(reqs[1].form.is_none());
        assert_eq!(header_of(&reqs[1], "cookie"), Some("PHPSESSID=fresh"));
        assert_eq!(header_of(&reqs[1], "content-type"), None);
    }

    #[test]
    fn deleted_session_cookie_is_ignored() {
        let resp = HttpResponse {
            status: 200,
            headers: vec![(
                "set-cookie".to_string(),
                "PHPSESSID=deleted; expires=Thu, 01 Jan 1970 00:00:01 GMT".to_string(),
            )],
            body: String::new(),
        };
        assert_eq!(extract_session_cookie(&resp), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_outlives_the_name() {
        let resp = HttpResponse {
            status: 302,
            headers: vec![
                ("Location".to_string(), "/ints/agent/SMSDashboard".to_string()),
                ("Set-Cookie".to_string(), "a=1".to_string()),
                ("set-cookie".to_string(), "PHPSESSID=b2".to_string()),
            ],
            body: String::new(),
        };

        let location = {
            let name = String::from("LOCATION");
            resp.header(&name)
        };
        assert_eq!(location, Some("/ints/agent/SMSDashboard"));
        assert_eq!(
            resp.header_values("Set-Cookie").collect::<Vec<_>>(),
            vec!["a=1", "PHPSESSID=b2"]
        );
        assert_eq!(resp.header("x-missing"), None);
    }
}
