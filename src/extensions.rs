const PERMESSAGE_DEFLATE: &str = "permessage-deflate";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";

const MIN_WINDOW_BITS: u8 = 9;
const MAX_WINDOW_BITS: u8 = 15;

/// Resolved permessage-deflate parameters for one connection.
///
/// Window sizes closer to 15 compress better but cost more memory; the
/// no-context-takeover flags force the matching dictionary to be reset at
/// every message boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extensions {
    pub client_no_context_takeover: bool,
    pub server_no_context_takeover: bool,
    pub client_max_window_bits: u8,
    pub server_max_window_bits: u8,
}

impl Default for Extensions {
    fn default() -> Self {
        Extensions {
            client_no_context_takeover: false,
            server_no_context_takeover: false,
            client_max_window_bits: MAX_WINDOW_BITS,
            server_max_window_bits: MAX_WINDOW_BITS,
        }
    }
}

fn parse_window_bits(token: &str) -> Option<u8> {
    let bits = token.split('=').nth(1)?.trim().trim_matches('"').parse::<u8>().ok()?;
    if (MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        Some(bits)
    } else {
        None
    }
}

/// Parses one `Sec-WebSocket-Extensions` offer or reply into resolved
/// parameters. Duplicate parameters, unknown parameters and out-of-range
/// window sizes all reject the whole header.
///
/// `require_window_values` demands an explicit `=value` on every window
/// parameter; a client offer is instead allowed to send a bare
/// `client_max_window_bits` (meaning "up to 15").
fn parse_header(header: &str, require_window_values: bool) -> Option<Extensions> {
    let mut tokens = header.split(';').map(|token| token.trim().to_lowercase());

    if tokens.next()? != PERMESSAGE_DEFLATE {
        return None;
    }

    let mut extensions = Extensions::default();
    let mut seen_client_takeover = false;
    let mut seen_server_takeover = false;
    let mut seen_client_window = false;
    let mut seen_server_window = false;

    for token in tokens {
        let name = token.split('=').next().unwrap_or_default().trim().to_string();
        match name.as_str() {
            CLIENT_NO_CONTEXT_TAKEOVER => {
                if seen_client_takeover || token.contains('=') {
                    return None;
                }
                seen_client_takeover = true;
                extensions.client_no_context_takeover = true;
            }
            SERVER_NO_CONTEXT_TAKEOVER => {
                if seen_server_takeover || token.contains('=') {
                    return None;
                }
                seen_server_takeover = true;
                extensions.server_no_context_takeover = true;
            }
            CLIENT_MAX_WINDOW_BITS => {
                if seen_client_window {
                    return None;
                }
                seen_client_window = true;
                if token.contains('=') {
                    extensions.client_max_window_bits = parse_window_bits(&token)?;
                } else if require_window_values {
                    return None;
                }
                // A bare client_max_window_bits in an offer keeps the
                // default window of 15.
            }
            SERVER_MAX_WINDOW_BITS => {
                if seen_server_window {
                    return None;
                }
                seen_server_window = true;
                extensions.server_max_window_bits = parse_window_bits(&token)?;
            }
            _ => return None,
        }
    }

    Some(extensions)
}

/// Server side: parses a client's extension offer.
pub fn parse_client_offer(header: &str) -> Option<Extensions> {
    parse_header(header, false)
}

/// Client side: parses the server's extension reply, where every window
/// parameter must carry a concrete value.
pub fn parse_server_reply(header: &str) -> Option<Extensions> {
    parse_header(header, true)
}

/// Builds the response header a server sends back, echoing the accepted
/// parameters with concrete window values.
pub fn create_response_header(extensions: &Extensions) -> String {
    let mut header = String::from(PERMESSAGE_DEFLATE);
    if extensions.client_no_context_takeover {
        header.push_str(&format!("; {}", CLIENT_NO_CONTEXT_TAKEOVER));
    }
    if extensions.server_no_context_takeover {
        header.push_str(&format!("; {}", SERVER_NO_CONTEXT_TAKEOVER));
    }
    header.push_str(&format!(
        "; {}={}",
        CLIENT_MAX_WINDOW_BITS, extensions.client_max_window_bits
    ));
    header.push_str(&format!(
        "; {}={}",
        SERVER_MAX_WINDOW_BITS, extensions.server_max_window_bits
    ));
    header
}

/// Builds the offer header a client puts in its upgrade request.
pub fn create_request_header() -> String {
    format!("{}; {}", PERMESSAGE_DEFLATE, CLIENT_MAX_WINDOW_BITS)
}
