/// Recommended operator action for a `(service, error_type)` pair.
///
/// Service-specific entries win; otherwise the error type alone decides.
#[must_use]
pub fn remediation_for(service: &str, error_type: &str) -> &'static str {
    match (service, error_type) {
        ("managed_job", "job_submit") => {
            "Check the job API key and account balance; submissions are being rejected."
        }
        ("managed_job", "poll_exhausted") => {
            "Jobs are not finishing in time; raise REVTRUST_JOB_POLL_MAX_ATTEMPTS or check the job provider status page."
        }
        ("third_party_api", "unexpected_status") => {
            "Reviews API is returning errors; verify REVTRUST_REVIEWS_API_KEY and remaining quota."
        }
        ("llm_analysis", "rate_limited") => {
            "LLM provider is rate limiting; lower REVTRUST_CHUNK_CONCURRENCY or raise the provider limit."
        }
        ("llm_analysis", "chunk_exhaustion") => {
            "Most chunks are failing; check the LLM endpoint, model name and response format."
        }
        (_, "soft_block" | "hard_block") => {
            "Marketplace is blocking requests; refresh session cookies in the egress file and check route health on /api/v1/egress."
        }
        (_, "timeout" | "transient_network") => {
            "Upstream is slow or unreachable; check proxy routes and network egress."
        }
        (_, "config") => "Required configuration is missing or invalid; review the service environment.",
        (_, "data_shape") => {
            "Upstream markup or payload format changed; inspect a raw response and update the parser."
        }
        (_, "not_found") => "Products are not resolving; confirm the country marketplace mapping.",
        (_, "llm_api") => "LLM API is returning errors; check the provider status and API key.",
        (_, "store") => "Database writes are failing; check connectivity and pool saturation.",
        _ => "Inspect recent logs for this service and error type.",
    }
}
