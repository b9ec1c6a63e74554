use crate::next_data::find_element;

/// Shrinks a fetched document before it is staged.
pub trait PayloadTrimmer: Send + Sync {
    fn trim(&self, payload: Vec<u8>) -> Vec<u8>;
}

/// Keeps only the `__NEXT_DATA__` script element of a listing page.
///
/// Everything the extractor reads lives in that element; the surrounding
/// markup is several times its size. Payloads without the element, or that
/// are not UTF-8, are returned untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextDataTrimmer;

impl PayloadTrimmer for NextDataTrimmer {
    fn trim(&self, payload: Vec<u8>) -> Vec<u8> {
        let Ok(html) = std::str::from_utf8(&payload) else {
            return payload;
        };
        let element = match find_element(html) {
            Ok(found) => found.map(|(element, _)| element.as_bytes().to_vec()),
            Err(e) => {
                tracing::debug!(error = %e, "trimming skipped");
                None
            }
        };
        element.unwrap_or(payload)
    }
}
