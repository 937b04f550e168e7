use std::sync::atomic::Ordering;

type AtomicId = std::sync::atomic::AtomicU16;

/// Printable process-local port identifier, used in logs and in the
/// cleanup registry.
#[derive(Clone, PartialEq, Eq)]
pub struct PortId([u8; 6]);

impl PortId {
    pub(crate) fn next() -> Self {
        static ID: AtomicId = AtomicId::new(0);
        let id = ID.fetch_add(1, Ordering::SeqCst);
        let mut buf = [b'p', b'0', b'0', b'0', b'0', b'0'];
        let len = buf.len();

        let mut b = itoa::Buffer::new();
        let id = b.format(id);
        let i = id.as_bytes();
        buf[len - i.len()..].copy_from_slice(i);

        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: string only construction and is immutable
        unsafe { std::str::from_utf8_unchecked(&self.0[..]) }
    }
}

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("PortId").field(&self.as_str()).finish()
    }
}

impl AsRef<str> for PortId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sequential_ids() {
        let a = PortId::next();
        let b = PortId::next();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with('p'));
        assert_eq!(a.as_str().len(), 6);
    }
}
