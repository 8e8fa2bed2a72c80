use std::cmp::Ordering;
use std::fmt;

/// A fixed-width key storable in B+ tree pages.
///
/// Keys are compared through `Ord` after decoding, so the encoding does not
/// have to preserve order.
pub trait IndexKey: Copy + Ord + Send + Sync + fmt::Debug + fmt::Display + 'static {
    /// Bytes taken by one encoded key
    const ENCODED_SIZE: usize;

    fn encode(&self, buf: &mut [u8]);

    fn decode(buf: &[u8]) -> Self;

    /// Builds a key from an integer, for loading keys from text files.
    fn from_integer(value: i64) -> Self;
}

macro_rules! impl_integer_key {
    ($($ty:ty),*) => {
        $(
            impl IndexKey for $ty {
                const ENCODED_SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(&self, buf: &mut [u8]) {
                    buf[..Self::ENCODED_SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn decode(buf: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(&buf[..Self::ENCODED_SIZE]);
                    <$ty>::from_le_bytes(bytes)
                }

                fn from_integer(value: i64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_integer_key!(i32, i64, u32, u64);

/// Opaque fixed-width key of `N` bytes.
///
/// The first `min(N, 8)` bytes hold a little-endian signed integer that
/// orders keys; remaining bytes break ties bytewise.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    const PREFIX_LEN: usize = if N < 8 { N } else { 8 };

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; N];
        let len = bytes.len().min(N);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The sign-extended integer prefix.
    pub fn to_integer(&self) -> i64 {
        let len = Self::PREFIX_LEN;
        if len == 0 {
            return 0;
        }
        let fill = if self.data[len - 1] & 0x80 != 0 { 0xFF } else { 0 };
        let mut bytes = [fill; 8];
        bytes[..len].copy_from_slice(&self.data[..len]);
        i64::from_le_bytes(bytes)
    }
}

impl<const N: usize> Ord for GenericKey<N> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_integer()
            .cmp(&other.to_integer())
            .then_with(|| self.data[Self::PREFIX_LEN..].cmp(&other.data[Self::PREFIX_LEN..]))
    }
}

impl<const N: usize> PartialOrd for GenericKey<N> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const N: usize> fmt::Debug for GenericKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GenericKey<{}>({})", N, self.to_integer())
    }
}

impl<const N: usize> fmt::Display for GenericKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_integer())
    }
}

impl<const N: usize> IndexKey for GenericKey<N> {
    const ENCODED_SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.data);
    }

    fn decode(buf: &[u8]) -> Self {
        Self::from_bytes(&buf[..N])
    }

    fn from_integer(value: i64) -> Self {
        let bytes = value.to_le_bytes();
        let len = Self::PREFIX_LEN;
        let mut data = [0u8; N];
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_key_encoding() {
        let mut buf = [0u8; 8];
        (-42i64).encode(&mut buf);
        assert_eq!(i64::decode(&buf), -42);

        let mut buf = [0u8; 4];
        7u32.encode(&mut buf);
        assert_eq!(u32::decode(&buf), 7);
        assert_eq!(i32::from_integer(-3), -3);
    }

    #[test]
    fn test_generic_key_orders_by_integer() {
        let keys: Vec<GenericKey<8>> = [5, -1, 3, 0]
            .iter()
            .map(|&v| GenericKey::from_integer(v))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        let values: Vec<i64> = sorted.iter().map(|k| k.to_integer()).collect();
        assert_eq!(values, vec![-1, 0, 3, 5]);
    }

    #[test]
    fn test_generic_key_narrow_and_wide() {
        let narrow = GenericKey::<4>::from_integer(-2);
        assert_eq!(narrow.to_integer(), -2);
        assert!(narrow < GenericKey::<4>::from_integer(1));

        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        a[8] = 1;
        b[8] = 2;
        // equal prefixes fall back to the trailing bytes
        assert!(GenericKey::<16>::from_bytes(&a) < GenericKey::<16>::from_bytes(&b));

        let mut buf = [0u8; 16];
        GenericKey::<16>::from_bytes(&b).encode(&mut buf);
        assert_eq!(GenericKey::<16>::decode(&buf), GenericKey::<16>::from_bytes(&b));
    }
}
