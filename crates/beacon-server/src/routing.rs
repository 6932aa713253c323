//! Request classification.
//!
//! Routing works on the raw path-and-query string rather than on axum's
//! path router: the link rule keeps everything after the token, query
//! string included, and tokens are case-preserving literals.

use std::sync::LazyLock;

use axum::http::Method;
use beacon_core::Token;
use percent_encoding::percent_decode_str;
use regex::Regex;

static SUBSCRIBE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/([A-Za-z0-9]+)$").unwrap());
static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/([A-Za-z0-9]+)\.png$").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/([A-Za-z0-9]+)/(.*)$").unwrap());
// Lowercase DNS name with at least two labels and an alphabetic TLD.
static MTA_STS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^/mta-sts\.txt\?domain=((?:[a-z0-9](?:[-a-z0-9]{0,61}[a-z0-9])?\.)+[a-z][-a-z0-9]{0,61}[a-z0-9])$",
    )
    .unwrap()
});

/// What an inbound request asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// WebSocket subscription for a token.
    Subscribe(Token),
    /// Image beacon hit.
    Image(Token),
    /// Redirect beacon hit; `location` is already percent-decoded.
    Link {
        /// Token to notify.
        token: Token,
        /// Redirect target.
        location: String,
    },
    /// MTA-STS policy passthrough.
    MtaSts {
        /// Policy domain.
        domain: String,
    },
    /// Everything else.
    NotFound,
}

impl Route {
    /// Label used for request metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Image(_) => "image",
            Self::Link { .. } => "link",
            Self::MtaSts { .. } => "mta_sts",
            Self::NotFound => "not_found",
        }
    }
}

/// Classify a request by method, raw path-and-query and upgrade intent.
pub fn classify(method: &Method, path_and_query: &str, is_upgrade: bool) -> Route {
    if is_upgrade {
        return SUBSCRIBE
            .captures(path_and_query)
            .and_then(|caps| token(&caps[1]))
            .map_or(Route::NotFound, Route::Subscribe);
    }

    if *method != Method::GET {
        return Route::NotFound;
    }

    if let Some(caps) = IMAGE.captures(path_and_query) {
        return token(&caps[1]).map_or(Route::NotFound, Route::Image);
    }

    if let Some(caps) = LINK.captures(path_and_query) {
        let Some(token) = token(&caps[1]) else {
            return Route::NotFound;
        };
        let rest = &caps[2];
        if !has_valid_escapes(rest) {
            return Route::NotFound;
        }
        return match percent_decode_str(rest).decode_utf8() {
            Ok(location) => Route::Link {
                token,
                location: location.into_owned(),
            },
            Err(_) => Route::NotFound,
        };
    }

    if let Some(caps) = MTA_STS.captures(path_and_query) {
        return Route::MtaSts {
            domain: caps[1].to_owned(),
        };
    }

    Route::NotFound
}

fn token(raw: &str) -> Option<Token> {
    Token::parse(raw).ok()
}

/// Every `%` must start a two-hex-digit escape; `percent_decode_str` passes
/// malformed ones through untouched.
fn has_valid_escapes(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            match bytes.get(i + 1..i + 3) {
                Some(hex) if hex.iter().all(u8::is_ascii_hexdigit) => i += 3,
                _ => return false,
            }
        } else {
            i += 1;
        }
    }
    true
}
