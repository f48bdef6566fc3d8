use cid::Cid;

use crate::error::DbError;

/// Address scheme prefix: `/braiddb/<manifestCid>/<name>`.
pub const SCHEME: &str = "braiddb";

/// Content-addressed database identity: manifest CID plus name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address {
    pub root: Cid,
    pub name: String,
}

impl Address {
    pub fn new(root: Cid, name: impl Into<String>) -> Self {
        Self {
            root,
            name: name.into(),
        }
    }

    /// Parse `/braiddb/<cid>/<name>`. Anything else is rejected; callers
    /// treat rejected strings as bare names.
    pub fn parse(s: &str) -> Result<Address, DbError> {
        let norm = s.trim_end_matches('/');
        let rest = norm
            .strip_prefix('/')
            .ok_or_else(|| DbError::InvalidAddress(s.to_string()))?;
        let mut parts = rest.splitn(3, '/');
        let scheme = parts.next().unwrap_or_default();
        let root = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        if scheme != SCHEME || root.is_empty() || name.is_empty() {
            return Err(DbError::InvalidAddress(s.to_string()));
        }
        let root = root
            .parse::<Cid>()
            .map_err(|_| DbError::InvalidAddress(s.to_string()))?;
        Ok(Address {
            root,
            name: name.to_string(),
        })
    }

    pub fn is_valid(s: &str) -> bool {
        Address::parse(s).is_ok()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}/{}/{}", SCHEME, self.root, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::cid_for;

    #[test]
    fn round_trips() {
        let addr = Address::new(cid_for(b"manifest"), "orders");
        let parsed = Address::parse(&addr.to_string()).unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let addr = Address::new(cid_for(b"m"), "a");
        let parsed = Address::parse(&format!("{addr}/")).unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn rejects_bare_names_and_junk() {
        for s in ["orders", "/braiddb/notacid/x", "/other/scheme/x", "/braiddb/", ""] {
            assert!(!Address::is_valid(s), "{s} should be invalid");
        }
    }

    #[test]
    fn name_may_contain_slashes() {
        let root = cid_for(b"m");
        let parsed = Address::parse(&format!("/{SCHEME}/{root}/a/b")).unwrap();
        assert_eq!(parsed.name, "a/b");
    }
}
