use crate::hashing::hash_str64;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};

// Every distinct string is stored exactly once for the life of the process
static STRING_TABLE: LazyLock<Mutex<HashMap<Arc<str>, u64>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// An interned, immutable string.
///
/// Two `InternedStr`s made from equal text share the same allocation, so equality is a pointer
/// comparison and hashing uses a precomputed hash of the text.
#[derive(Clone)]
pub struct InternedStr
{
    text: Arc<str>,
    hash: u64,
}
impl InternedStr
{
    #[must_use]
    pub fn new(text: &str) -> Self
    {
        let mut table = STRING_TABLE.lock();
        if let Some((text, hash)) = table.get_key_value(text)
        {
            return Self { text: text.clone(), hash: *hash };
        }

        let text: Arc<str> = Arc::from(text);
        let hash = hash_str64(&text);
        table.insert(text.clone(), hash);
        Self { text, hash }
    }

    #[inline] #[must_use]
    pub fn as_str(&self) -> &str { &self.text }

    #[inline] #[must_use]
    pub fn hash64(&self) -> u64 { self.hash }

    #[inline] #[must_use]
    pub fn is_empty(&self) -> bool { self.text.is_empty() }
}
impl Default for InternedStr
{
    fn default() -> Self { Self::new("") }
}
impl PartialEq for InternedStr
{
    #[inline]
    fn eq(&self, other: &Self) -> bool
    {
        Arc::ptr_eq(&self.text, &other.text)
    }
}
impl Eq for InternedStr { }
impl Hash for InternedStr
{
    fn hash<H: Hasher>(&self, state: &mut H)
    {
        state.write_u64(self.hash);
    }
}
impl AsRef<str> for InternedStr
{
    fn as_ref(&self) -> &str { &self.text }
}
impl Display for InternedStr
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Display::fmt(&*self.text, f) }
}
impl Debug for InternedStr
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Debug::fmt(&*self.text, f) }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn equal_text_shares_storage()
    {
        let a = InternedStr::new("maps/level1.tmx");
        let b = InternedStr::new(&String::from("maps/level1.tmx"));
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.text, &b.text));
        assert_eq!(a.hash64(), b.hash64());
    }

    #[test]
    fn different_text_differs()
    {
        assert_ne!(InternedStr::new("a.png"), InternedStr::new("b.png"));
    }

    #[test]
    fn default_is_empty()
    {
        assert!(InternedStr::default().is_empty());
        assert_eq!(InternedStr::default(), InternedStr::new(""));
    }
}
