//! Response header parsing.

/// `Content-Length` of the final response in a header dump.
///
/// With redirects followed, curl reports every hop's headers; only the
/// block after the last status line describes the resource.
pub fn content_length(lines: &[String]) -> Option<u64> {
    let mut length = None;
    for line in lines {
        let line = line.trim();
        if line.starts_with("HTTP/") {
            length = None;
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                length = value.trim().parse::<u64>().ok();
            }
        }
    }
    length
}
