//! USB vendor/product identity with partial-match semantics.

/// A vendor/product pair where either field may be unset. Unset fields
/// match anything when used as a search pattern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsbId {
    pub vendor: Option<u16>,
    pub product: Option<u16>,
}

impl UsbId {
    pub fn new(vendor: u16, product: u16) -> Self {
        UsbId {
            vendor: Some(vendor),
            product: Some(product),
        }
    }

    pub fn clear(&mut self) {
        self.vendor = None;
        self.product = None;
    }

    /// True if this identity satisfies `search`. Unset search fields
    /// match anything.
    pub fn matches(&self, search: &UsbId) -> bool {
        if let Some(v) = search.vendor
            && self.vendor != Some(v)
        {
            return false;
        }
        if let Some(p) = search.product
            && self.product != Some(p)
        {
            return false;
        }
        true
    }

    /// Like [UsbId::matches], but a concrete 0xFFFF in this identity also
    /// matches anything. The DFU suffix uses 0xFFFF as "any device".
    pub fn matches_wild(&self, search: &UsbId) -> bool {
        if let Some(v) = search.vendor
            && self.vendor != Some(0xFFFF)
            && self.vendor != Some(v)
        {
            return false;
        }
        if let Some(p) = search.product
            && self.product != Some(0xFFFF)
            && self.product != Some(p)
        {
            return false;
        }
        true
    }

    /// Overwrite fields of self with any set fields of `src`.
    pub fn merge_from(&mut self, src: &UsbId) {
        if src.vendor.is_some() {
            self.vendor = src.vendor;
        }
        if src.product.is_some() {
            self.product = src.product;
        }
    }

    /// Fill only unset fields of self from `src`.
    pub fn defaults_from(&mut self, src: &UsbId) {
        if self.vendor.is_none() {
            self.vendor = src.vendor;
        }
        if self.product.is_none() {
            self.product = src.product;
        }
    }
}

impl std::fmt::Display for UsbId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.vendor {
            Some(v) => write!(f, "{:04x}", v)?,
            None => write!(f, "*")?,
        }
        write!(f, ":")?;
        match self.product {
            Some(p) => write!(f, "{:04x}", p),
            None => write!(f, "*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_search_matches_anything() {
        let id = UsbId::new(0x0483, 0xDF11);
        assert!(id.matches(&UsbId::default()));
        assert!(id.matches(&UsbId {
            vendor: Some(0x0483),
            product: None
        }));
        assert!(!id.matches(&UsbId::new(0x0483, 0x0001)));
        assert!(!id.matches(&UsbId::new(0x1209, 0xDF11)));
    }

    #[test]
    fn test_unset_self_does_not_match_concrete_search() {
        let id = UsbId::default();
        assert!(!id.matches(&UsbId::new(0x0483, 0xDF11)));
        assert!(id.matches(&UsbId::default()));
    }

    #[test]
    fn test_wildcard_ffff() {
        let id = UsbId::new(0xFFFF, 0xDF11);
        assert!(id.matches_wild(&UsbId::new(0x1209, 0xDF11)));
        assert!(!id.matches_wild(&UsbId::new(0x1209, 0x0001)));
        // plain matching treats 0xFFFF as a normal value
        assert!(!id.matches(&UsbId::new(0x1209, 0xDF11)));

        let any = UsbId::new(0xFFFF, 0xFFFF);
        assert!(any.matches_wild(&UsbId::new(0x1234, 0x5678)));
    }

    #[test]
    fn test_merge_and_defaults() {
        let mut id = UsbId {
            vendor: Some(0x0483),
            product: None,
        };
        id.defaults_from(&UsbId::new(0x1209, 0xDF11));
        assert_eq!(id, UsbId::new(0x0483, 0xDF11));

        id.merge_from(&UsbId {
            vendor: Some(0x1209),
            product: None,
        });
        assert_eq!(id, UsbId::new(0x1209, 0xDF11));
    }
}
