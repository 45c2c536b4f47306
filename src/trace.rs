//! Distributed-tracing context carried across engine callbacks
//!
//! Inbound contexts are read from the W3C `traceparent` header, falling back
//! to Jaeger's `uber-trace-id`. Each dispatched call gets a child context
//! whose `traceparent` is injected into the calls it makes back out.

use axum::http::{HeaderMap, HeaderValue};

/// W3C trace-context header
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Jaeger propagation header
pub const UBER_TRACE_ID_HEADER: &str = "uber-trace-id";

/// Trace identity of the current unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub parent_span_id: Option<u64>,
    pub sampled: bool,
}

impl TraceContext {
    /// Start a new trace
    pub fn root() -> Self {
        Self {
            trace_id: random_trace_id(),
            span_id: random_span_id(),
            parent_span_id: None,
            sampled: true,
        }
    }

    /// Read a propagated context, if any
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        if let Some(ctx) = header_str(headers, TRACEPARENT_HEADER).and_then(parse_traceparent) {
            return Some(ctx);
        }
        header_str(headers, UBER_TRACE_ID_HEADER).and_then(parse_uber_trace_id)
    }

    /// Child of the propagated context, or a fresh root when none was sent
    pub fn extract_child(headers: &HeaderMap) -> Self {
        match Self::from_headers(headers) {
            Some(parent) => parent.child(),
            None => Self::root(),
        }
    }

    /// New span in the same trace, parented on this one
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: random_span_id(),
            parent_span_id: Some(self.span_id),
            sampled: self.sampled,
        }
    }

    pub fn trace_id_hex(&self) -> String {
        format!("{:032x}", self.trace_id)
    }

    pub fn span_id_hex(&self) -> String {
        format!("{:016x}", self.span_id)
    }

    pub fn parent_span_id_hex(&self) -> Option<String> {
        self.parent_span_id.map(|id| format!("{:016x}", id))
    }

    /// W3C header value identifying this span as the parent
    pub fn traceparent(&self) -> String {
        format!(
            "00-{}-{}-{:02x}",
            self.trace_id_hex(),
            self.span_id_hex(),
            u8::from(self.sampled)
        )
    }

    /// Write this context into outbound headers
    pub fn inject(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.traceparent()) {
            headers.insert(TRACEPARENT_HEADER, value);
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_traceparent(value: &str) -> Option<TraceContext> {
    let parts: Vec<&str> = value.trim().split('-').collect();
    if parts.len() < 4 {
        return None;
    }
    let (version, trace, span, flags) = (parts[0], parts[1], parts[2], parts[3]);
    if version.len() != 2 || version.eq_ignore_ascii_case("ff") {
        return None;
    }
    if trace.len() != 32 || span.len() != 16 || flags.len() != 2 {
        return None;
    }
    let trace_id = u128::from_str_radix(trace, 16).ok()?;
    let span_id = u64::from_str_radix(span, 16).ok()?;
    let flags = u8::from_str_radix(flags, 16).ok()?;
    if trace_id == 0 || span_id == 0 {
        return None;
    }
    Some(TraceContext {
        trace_id,
        span_id,
        parent_span_id: None,
        sampled: flags & 0x01 == 0x01,
    })
}

// {trace-id}:{span-id}:{parent-span-id}:{flags}
fn parse_uber_trace_id(value: &str) -> Option<TraceContext> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.len() != 4 || parts[0].len() > 32 || parts[1].len() > 16 {
        return None;
    }
    let trace_id = u128::from_str_radix(parts[0], 16).ok()?;
    let span_id = u64::from_str_radix(parts[1], 16).ok()?;
    let parent = u64::from_str_radix(parts[2], 16).ok()?;
    let flags = u8::from_str_radix(parts[3], 16).ok()?;
    if trace_id == 0 || span_id == 0 {
        return None;
    }
    Some(TraceContext {
        trace_id,
        span_id,
        parent_span_id: (parent != 0).then_some(parent),
        sampled: flags & 0x01 == 0x01,
    })
}

fn random_trace_id() -> u128 {
    uuid::Uuid::new_v4().as_u128()
}

fn random_span_id() -> u64 {
    (uuid::Uuid::new_v4().as_u128() as u64) | 1
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_traceparent() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACEPARENT_HEADER, HeaderValue::from_static(PARENT));

        let ctx = TraceContext::from_headers(&headers).unwrap();
        assert_eq!(ctx.trace_id_hex(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id_hex(), "00f067aa0ba902b7");
        assert!(ctx.sampled);
        assert_eq!(ctx.traceparent(), PARENT);
    }

    #[test]
    fn test_child_keeps_trace_and_links_parent() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACEPARENT_HEADER, HeaderValue::from_static(PARENT));

        let child = TraceContext::extract_child(&headers);
        assert_eq!(child.trace_id_hex(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(child.parent_span_id_hex().as_deref(), Some("00f067aa0ba902b7"));
        assert_ne!(child.span_id_hex(), "00f067aa0ba902b7");
    }

    #[test]
    fn test_uber_trace_id_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            UBER_TRACE_ID_HEADER,
            HeaderValue::from_static("7a1b2c:3d4e5f:0:1"),
        );
        let ctx = TraceContext::from_headers(&headers).unwrap();
        assert_eq!(ctx.trace_id, 0x7a1b2c);
        assert_eq!(ctx.span_id, 0x3d4e5f);
        assert_eq!(ctx.parent_span_id, None);
    }

    #[test]
    fn test_rejects_malformed_headers() {
        for bad in [
            "garbage",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-zzzzzzzzzzzzzzzz-01",
        ] {
            let mut headers = HeaderMap::new();
            headers.insert(TRACEPARENT_HEADER, HeaderValue::from_str(bad).unwrap());
            assert!(TraceContext::from_headers(&headers).is_none(), "{bad}");
        }
    }

    #[test]
    fn test_missing_headers_start_new_root() {
        let ctx = TraceContext::extract_child(&HeaderMap::new());
        assert!(ctx.parent_span_id.is_none());
        assert_ne!(ctx.span_id, 0);
    }

    #[test]
    fn test_inject_roundtrips() {
        let ctx = TraceContext::root();
        let mut headers = HeaderMap::new();
        ctx.inject(&mut headers);
        let parsed = TraceContext::from_headers(&headers).unwrap();
        assert_eq!(parsed.trace_id, ctx.trace_id);
        assert_eq!(parsed.span_id, ctx.span_id);
    }
}
