use nab_kiln::InternedStr;
use std::fmt::{Debug, Display, Formatter};

/// Identifies a resource by its logical path (e.g. `textures/grass.png`).
///
/// Ids are interned: cloning is cheap and equality is an identity comparison, so any two ids made
/// from the same path refer to the same cache entry. Backslashes are normalized to `/`.
/// The empty path is the invalid id (and the default).
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ResourceId(InternedStr);
impl ResourceId
{
    #[must_use]
    pub fn new(path: &str) -> Self
    {
        match path.contains('\\')
        {
            true => Self(InternedStr::new(&path.replace('\\', "/"))),
            false => Self(InternedStr::new(path)),
        }
    }

    #[inline] #[must_use]
    pub fn is_valid(&self) -> bool { !self.0.is_empty() }

    #[inline] #[must_use]
    pub fn as_str(&self) -> &str { self.0.as_str() }

    // Stable hash of the path
    #[inline] #[must_use]
    pub fn hash64(&self) -> u64 { self.0.hash64() }

    /// The text after the last `.` of the file name, if any
    #[must_use]
    pub fn extension(&self) -> Option<&str>
    {
        let path = self.as_str();
        let file_name = match path.rfind('/')
        {
            Some(slash) => &path[slash + 1..],
            None => path,
        };
        match file_name.rfind('.')
        {
            Some(0) | None => None, // dotfiles have no extension
            Some(dot) if dot + 1 == file_name.len() => None,
            Some(dot) => Some(&file_name[dot + 1..]),
        }
    }
}
impl From<&str> for ResourceId
{
    fn from(path: &str) -> Self { Self::new(path) }
}
impl From<&String> for ResourceId
{
    fn from(path: &String) -> Self { Self::new(path) }
}
impl AsRef<str> for ResourceId
{
    fn as_ref(&self) -> &str { self.as_str() }
}
impl Display for ResourceId
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Display::fmt(&self.0, f) }
}
impl Debug for ResourceId
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result
    {
        match self.is_valid()
        {
            true => Debug::fmt(&self.0, f),
            false => f.write_str("<invalid>"),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn equal_paths_are_equal_ids()
    {
        let a = ResourceId::new("textures/grass.png");
        let b = ResourceId::from(&"textures/grass.png".to_string());
        assert_eq!(a, b);
        assert_eq!(a.hash64(), b.hash64());
        assert_ne!(a, ResourceId::new("textures/dirt.png"));
    }

    #[test]
    fn backslashes_normalized()
    {
        assert_eq!(ResourceId::new("maps/level1.tmx"), ResourceId::new("maps\\level1.tmx"));
    }

    #[test]
    fn validity()
    {
        assert!(!ResourceId::default().is_valid());
        assert!(!ResourceId::new("").is_valid());
        assert!(ResourceId::new("a.txt").is_valid());
        assert_eq!("<invalid>", format!("{:?}", ResourceId::default()));
    }

    #[test]
    fn extensions()
    {
        assert_eq!(Some("png"), ResourceId::new("textures/grass.png").extension());
        assert_eq!(Some("json"), ResourceId::new("scene.v2/level.json").extension());
        assert_eq!(None, ResourceId::new("scene.v2/level").extension());
        assert_eq!(None, ResourceId::new("config/.hidden").extension());
        assert_eq!(None, ResourceId::new("trailing.").extension());
    }
}
