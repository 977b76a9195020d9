use llmux_provider_core::{Headers, header_set};

pub fn set_bearer(headers: &mut Headers, token: &str) {
    header_set(headers, "Authorization", format!("Bearer {token}"));
}

pub fn set_json(headers: &mut Headers) {
    header_set(headers, "Content-Type", "application/json");
    header_set(headers, "Accept", "application/json");
}

pub fn set_sse_accept(headers: &mut Headers) {
    header_set(headers, "Accept", "text/event-stream");
}

pub fn set_user_agent(headers: &mut Headers, value: &str) {
    header_set(headers, "User-Agent", value);
}

pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
