//! 可观测性模块集成测试
//!
//! 未安装全局 recorder / tracer 时各记录函数应静默执行。

mod metrics_tests {
    use chargeflow_shared::observability::metrics::*;

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/risk-score/{merchant_id}/{order_id}", 200, 0.004);
        record_http_request("GET", "/recommendation/{merchant_id}/{transaction_id}", 404, 0.002);
        record_http_request("GET", "/health", 503, 0.001);
    }

    #[test]
    fn test_record_pipeline_metrics() {
        record_event("order.created", "success", 0.01);
        record_event("dispute.opened", "dead_letter", 0.2);
        record_risk_score("COMPLETE", 20);
        record_risk_score("PARTIAL", 35);
        record_recommendation("FIGHT", "AVAILABLE");
        record_recommendation("REVIEW", "UNKNOWN");
        record_risk_resolution(1, true);
        record_risk_resolution(5, false);
        record_lookup("risk", "FOUND");
        record_lookup("recommendation", "NOT_FOUND");
    }

    #[test]
    fn test_handle_absent_before_init() {
        assert!(get_handle().is_none());
    }
}

mod tracing_tests {
    use std::collections::HashMap;

    use chargeflow_shared::observability::tracing::*;
    use opentelemetry::trace::TraceContextExt;

    #[test]
    fn test_extract_valid_traceparent() {
        let mut headers = HashMap::new();
        headers.insert(
            "traceparent".to_string(),
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".to_string(),
        );

        let context = extract_from_headers(&headers);
        let span = context.span();
        let span_context = span.span_context();

        assert!(span_context.is_valid());
        assert_eq!(
            span_context.trace_id().to_string(),
            "0af7651916cd43dd8448eb211c80319c"
        );
        assert!(span_context.is_remote());
    }

    #[test]
    fn test_extract_malformed_traceparent() {
        let mut headers = HashMap::new();
        headers.insert("traceparent".to_string(), "not-a-trace".to_string());

        let context = extract_from_headers(&headers);
        assert!(!context.span().span_context().is_valid());
    }

    #[test]
    fn test_inject_without_active_span() {
        let mut headers = HashMap::new();
        inject_to_headers(&mut headers);

        assert!(!headers.contains_key("traceparent"));
    }
}

mod middleware_tests {
    use chargeflow_shared::observability::middleware::RequestId;

    #[test]
    fn test_request_id_wrapper() {
        let id = RequestId("req-abc".to_string());
        assert_eq!(id.as_str(), "req-abc");
        assert_eq!(id.clone().0, "req-abc");
    }
}
