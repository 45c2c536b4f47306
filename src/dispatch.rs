//! Dispatch wrapper — turns an inbound callback into a handler call and the
//! handler's outcome into an HTTP answer
//!
//! Every registered procedure goes through the same boundary: decode the
//! body, open a child span of the propagated trace, build the per-call
//! context, run the handler, and answer. Handler errors and panics never
//! escape it; they become `InvocationError` bodies.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use crate::context::ProceduralCtx;
use crate::error::{InvocationError, Result, HANDLER_ERROR_KIND};
use crate::provider::ProviderShared;
use crate::server::RouteHandler;
use crate::trace::TraceContext;
use crate::types::{CallbackRequest, Entity};

/// Boxed handler outcome, already serialized
pub type HandlerFuture = BoxFuture<'static, Result<Value>>;

type EntityHandlerFn = dyn Fn(ProceduralCtx, Entity, Value) -> HandlerFuture + Send + Sync;
type InputHandlerFn = dyn Fn(ProceduralCtx, Value) -> HandlerFuture + Send + Sync;

/// User logic bound to a procedure route
#[derive(Clone)]
pub enum ProcedureHandler {
    /// Entity-level procedures and intentful hooks: `(ctx, entity, input)`
    WithEntity(Arc<EntityHandlerFn>),
    /// Kind- and provider-level procedures: `(ctx, input)`
    InputOnly(Arc<InputHandlerFn>),
}

impl ProcedureHandler {
    pub fn with_entity<F, Fut, R>(handler: F) -> Self
    where
        F: Fn(ProceduralCtx, Entity, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize,
    {
        Self::WithEntity(Arc::new(move |ctx, entity, input| {
            let fut = handler(ctx, entity, input);
            async move { Ok(serde_json::to_value(fut.await?)?) }.boxed()
        }))
    }

    pub fn input_only<F, Fut, R>(handler: F) -> Self
    where
        F: Fn(ProceduralCtx, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize,
    {
        Self::InputOnly(Arc::new(move |ctx, input| {
            let fut = handler(ctx, input);
            async move { Ok(serde_json::to_value(fut.await?)?) }.boxed()
        }))
    }

    fn call(&self, ctx: ProceduralCtx, request: CallbackRequest) -> HandlerFuture {
        match self {
            Self::WithEntity(handler) => {
                let entity = request.entity();
                handler(ctx, entity, request.input)
            }
            Self::InputOnly(handler) => handler(ctx, request.input),
        }
    }
}

impl std::fmt::Debug for ProcedureHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WithEntity(_) => f.write_str("ProcedureHandler::WithEntity"),
            Self::InputOnly(_) => f.write_str("ProcedureHandler::InputOnly"),
        }
    }
}

/// Span/operation name of a procedure
pub fn operation_name(procedure: &str, kind: Option<&str>) -> String {
    format!("{}_{}_procedure", procedure, kind.unwrap_or("provider"))
}

/// One procedure's dispatch boundary
pub(crate) struct Dispatcher {
    shared: Arc<ProviderShared>,
    operation: String,
    handler: ProcedureHandler,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<ProviderShared>,
        procedure: &str,
        kind: Option<&str>,
        handler: ProcedureHandler,
    ) -> Self {
        Self {
            shared,
            operation: operation_name(procedure, kind),
            handler,
        }
    }

    pub(crate) fn into_route(self) -> RouteHandler {
        let dispatcher = Arc::new(self);
        Arc::new(move |headers: HeaderMap, body: Bytes| {
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.dispatch(headers, body).await }.boxed()
        })
    }

    async fn dispatch(&self, headers: HeaderMap, body: Bytes) -> Response {
        let trace = TraceContext::extract_child(&headers);
        let span = tracing::info_span!(
            "procedure",
            otel.name = %self.operation,
            trace_id = %trace.trace_id_hex(),
            span_id = %trace.span_id_hex(),
            parent_span_id = tracing::field::Empty,
        );
        if let Some(parent) = trace.parent_span_id_hex() {
            span.record("parent_span_id", parent.as_str());
        }

        let outcome = AssertUnwindSafe(self.invoke(headers, body, trace))
            .catch_unwind()
            .instrument(span.clone())
            .await;

        span.in_scope(|| match outcome {
            Ok(Ok(value)) => (StatusCode::OK, Json(value)).into_response(),
            Ok(Err(err)) => {
                let err = InvocationError::from(err);
                if err.status_code >= 500 {
                    tracing::error!(status = err.status_code, error = %err, "Procedure failed");
                } else {
                    tracing::warn!(status = err.status_code, error = %err, "Procedure rejected");
                }
                err.into_response()
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(error = %message, "Procedure handler panicked");
                InvocationError::new(500, message)
                    .with_kind(HANDLER_ERROR_KIND)
                    .into_response()
            }
        })
    }

    async fn invoke(&self, headers: HeaderMap, body: Bytes, trace: TraceContext) -> Result<Value> {
        let request = decode_request(&body)?;
        let runtime = self.shared.runtime()?;
        let ctx = ProceduralCtx::new(
            runtime,
            self.shared.engine.with_trace(trace),
            headers,
            trace,
            self.operation.clone(),
        );
        self.handler.call(ctx, request).await
    }
}

fn decode_request(body: &[u8]) -> Result<CallbackRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CallbackRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        InvocationError::bad_request(format!("Malformed callback body: {}", e)).into()
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Procedure handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Procedure handler panicked: {}", s)
    } else {
        "Procedure handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    #[test]
    fn test_operation_name() {
        assert_eq!(operation_name("moveX", Some("Location")), "moveX_Location_procedure");
        assert_eq!(operation_name("computeSum", None), "computeSum_provider_procedure");
    }

    #[test]
    fn test_decode_request() {
        let request = decode_request(br#"{"spec": {"x": 10}, "input": 5}"#).unwrap();
        assert_eq!(request.input, 5);
        assert_eq!(request.entity().spec["x"], 10);

        let empty = decode_request(b"  ").unwrap();
        assert!(empty.input.is_null());

        let err = decode_request(b"{not json").unwrap_err();
        match err {
            ProviderError::Invocation(e) => assert_eq!(e.status_code, 400),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "Procedure handler panicked: boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "Procedure handler panicked");
    }
}
