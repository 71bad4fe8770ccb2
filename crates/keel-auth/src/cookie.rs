//! Request cookie access and outgoing cookie queue.

use std::collections::HashMap;

/// A cookie queued for the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    /// `None` clears the cookie.
    pub value: Option<String>,
    /// Unix timestamp; 0 expires with the browser session.
    pub expire: i64,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    /// Whether this cookie tells the client to drop a stored one.
    pub fn is_cleared(&self) -> bool {
        self.value.is_none()
    }
}

/// Reads the cookies of the current request and queues the ones to send.
#[derive(Debug, Clone)]
pub struct CookieJar {
    request: HashMap<String, String>,
    path: String,
    domain: Option<String>,
    queued: Vec<Cookie>,
}

impl CookieJar {
    /// A jar over the request cookies with default `path` and `domain` for
    /// queued cookies.
    pub fn new(request: HashMap<String, String>, path: impl Into<String>, domain: Option<String>) -> Self {
        Self {
            request,
            path: path.into(),
            domain,
            queued: Vec::new(),
        }
    }

    /// A jar with path `/` and no domain.
    pub fn from_request(request: HashMap<String, String>) -> Self {
        Self::new(request, "/", None)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key, None).is_some()
    }

    /// The request cookie `key`, or `default` when it was not sent.
    pub fn get<'a>(&'a self, key: &str, default: Option<&'a str>) -> Option<&'a str> {
        self.request.get(key).map(String::as_str).or(default)
    }

    /// Queue a cookie. `path` and `domain` fall back to the jar defaults.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: Option<String>,
        expire: i64,
        path: Option<&str>,
        domain: Option<&str>,
        secure: bool,
        http_only: bool,
    ) -> &Cookie {
        let cookie = Cookie {
            name: name.into(),
            value,
            expire,
            path: path.map_or_else(|| self.path.clone(), str::to_string),
            domain: domain.map(str::to_string).or_else(|| self.domain.clone()),
            secure,
            http_only,
        };
        tracing::trace!(cookie = %cookie.name, cleared = cookie.is_cleared(), "Queued cookie");
        self.queued.push(cookie);
        &self.queued[self.queued.len() - 1]
    }

    /// Queue a cookie that expires immediately.
    pub fn remove(&mut self, name: impl Into<String>, path: Option<&str>, domain: Option<&str>) -> &Cookie {
        self.set(name, None, 1, path, domain, false, true)
    }

    /// Cookies queued so far, in order.
    pub fn queued(&self) -> &[Cookie] {
        &self.queued
    }

    /// Take the queue, leaving it empty.
    pub fn drain(&mut self) -> Vec<Cookie> {
        std::mem::take(&mut self.queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jar() -> CookieJar {
        let request = HashMap::from([("theme".to_string(), "dark".to_string())]);
        CookieJar::new(request, "/app", Some("example.com".to_string()))
    }

    #[test]
    fn test_request_cookies() {
        let jar = jar();
        assert!(jar.has("theme"));
        assert!(!jar.has("lang"));
        assert_eq!(jar.get("theme", None), Some("dark"));
        assert_eq!(jar.get("lang", Some("en")), Some("en"));
        assert_eq!(jar.get("lang", None), None);
    }

    #[test]
    fn test_set_uses_defaults() {
        let mut jar = jar();
        let cookie = jar.set("lang", Some("de".into()), 0, None, None, false, true).clone();
        assert_eq!(cookie.path, "/app");
        assert_eq!(cookie.domain.as_deref(), Some("example.com"));
        assert!(cookie.http_only);

        let cookie = jar
            .set("lang", Some("fr".into()), 3600, Some("/"), Some("other.org"), true, false)
            .clone();
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.domain.as_deref(), Some("other.org"));
        assert!(cookie.secure);

        // queued cookies are not visible as request cookies
        assert!(!jar.has("lang"));
        assert_eq!(jar.queued().len(), 2);
    }

    #[test]
    fn test_remove_queues_expired_cookie() {
        let mut jar = CookieJar::from_request(HashMap::new());
        let cookie = jar.remove("session", None, None).clone();

        assert!(cookie.is_cleared());
        assert_eq!(cookie.expire, 1);
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.domain, None);

        assert_eq!(jar.drain(), vec![cookie]);
        assert!(jar.queued().is_empty());
    }
}
