use crate::{LoadResult, Resource};
use parking_lot::RwLock;

/// UTF-8 text (plain text, json, toml, tilemap xml, ...). Editable after load so it can be saved back out.
#[derive(Default)]
pub struct TextFileResource
{
    text: RwLock<String>,
}
impl TextFileResource
{
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self
    {
        Self { text: RwLock::new(text.into()) }
    }

    #[must_use]
    pub fn text(&self) -> String { self.text.read().clone() }

    pub fn with_text<R>(&self, read_fn: impl FnOnce(&str) -> R) -> R
    {
        read_fn(self.text.read().as_str())
    }

    pub fn set_text(&self, text: impl Into<String>)
    {
        *self.text.write() = text.into();
    }

    #[must_use]
    pub fn len(&self) -> usize { self.text.read().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.text.read().is_empty() }
}
impl Resource for TextFileResource
{
    fn load(&mut self, raw_bytes: Vec<u8>) -> LoadResult
    {
        if raw_bytes.is_empty()
        {
            log::warn!(target: "ResourceLoader", "Text file is empty");
            return LoadResult::Failed;
        }

        match String::from_utf8(raw_bytes)
        {
            Ok(text) =>
            {
                *self.text.get_mut() = text;
                LoadResult::SucceededKeepingRawBytes
            },
            Err(err) =>
            {
                log::warn!(target: "ResourceLoader", "Text file is not valid UTF-8: {err}");
                LoadResult::Failed
            }
        }
    }

    fn unload(&mut self)
    {
        self.text.get_mut().clear();
    }

    fn save(&self) -> Option<Vec<u8>>
    {
        Some(self.text.read().as_bytes().to_vec())
    }
}

/// Opaque bytes, kept as-is
#[derive(Default)]
pub struct BlobResource
{
    bytes: Vec<u8>,
}
impl BlobResource
{
    #[inline] #[must_use]
    pub fn bytes(&self) -> &[u8] { &self.bytes }
}
impl Resource for BlobResource
{
    fn load(&mut self, raw_bytes: Vec<u8>) -> LoadResult
    {
        self.bytes = raw_bytes;
        LoadResult::SucceededKeepingRawBytes
    }

    fn unload(&mut self)
    {
        self.bytes = Vec::new();
    }

    fn save(&self) -> Option<Vec<u8>> { Some(self.bytes.clone()) }
}

#[cfg(test)]
mod tests
{
    use super::*;

    mod text
    {
        use super::*;

        #[test]
        fn load_and_save()
        {
            let mut text = TextFileResource::default();
            assert_eq!(LoadResult::SucceededKeepingRawBytes, text.load(b"hello world".to_vec()));
            assert_eq!("hello world", text.text());
            assert_eq!(11, text.len());

            text.set_text("goodbye");
            assert_eq!(Some(b"goodbye".to_vec()), text.save());

            text.unload();
            assert!(text.is_empty());
        }

        #[test]
        fn empty_fails()
        {
            let mut text = TextFileResource::new("untouched");
            assert_eq!(LoadResult::Failed, text.load(Vec::new()));
            assert_eq!("untouched", text.text());
        }

        #[test]
        fn invalid_utf8_fails()
        {
            let mut text = TextFileResource::default();
            assert_eq!(LoadResult::Failed, text.load(vec![0xff, 0xfe, 0x00]));
            assert!(text.is_empty());
        }
    }

    #[test]
    fn blob()
    {
        let mut blob = BlobResource::default();
        assert!(blob.load(vec![1, 2, 3]).is_success());
        assert_eq!(&[1, 2, 3], blob.bytes());
        assert_eq!(Some(vec![1, 2, 3]), blob.save());
        blob.unload();
        assert!(blob.bytes().is_empty());
    }
}
