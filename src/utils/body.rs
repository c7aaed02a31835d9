//! 响应体捕获工具

use std::borrow::Cow;
use std::io::Read;

/// 判断 content-type 是否为 JSON（application/json 或 application/*+json）
#[must_use]
pub fn content_type_is_json(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("application/json") || ct.contains("+json")
}

fn read_bounded(mut reader: impl Read, capacity_hint: usize, max_out: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(capacity_hint.min(max_out));
    let mut buf = [0u8; 8192];
    while out.len() < max_out {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let take = n.min(max_out - out.len());
                out.extend_from_slice(&buf[..take]);
                if take < n {
                    break;
                }
            }
        }
    }
    out
}

/// 仅用于捕获侧的限量解压（不影响返回给调用方的原始字节）
///
/// 支持 gzip/deflate/br；对于逗号分隔的多编码，选择首个可识别的编码处理。
#[must_use]
pub fn decompress_for_capture<'a>(
    encoding: Option<&str>,
    input: &'a [u8],
    max_out: usize,
) -> Cow<'a, [u8]> {
    use flate2::read::{GzDecoder, ZlibDecoder};

    let normalize = |e: &str| {
        e.split(',')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase()
    };
    match encoding.map(normalize) {
        Some(enc) if enc.contains("gzip") => {
            Cow::Owned(read_bounded(GzDecoder::new(input), input.len(), max_out))
        }
        Some(enc) if enc.contains("deflate") => {
            Cow::Owned(read_bounded(ZlibDecoder::new(input), input.len(), max_out))
        }
        Some(enc) if enc == "br" || enc.contains("brotli") => Cow::Owned(read_bounded(
            brotli_decompressor::Decompressor::new(input, 4096),
            input.len(),
            max_out,
        )),
        _ => Cow::Borrowed(input),
    }
}
