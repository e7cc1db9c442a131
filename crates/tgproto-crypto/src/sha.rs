//! Small helper macros to hash the concatenation of several byte slices
//! without building an intermediate `Vec` by hand at every call site.

/// Computes `SHA1(a || b || ...)` over any number of `AsRef<[u8]>` arguments.
macro_rules! sha1 {
    ( $( $x:expr ),+ $(,)? ) => {{
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        $( hasher.update(AsRef::<[u8]>::as_ref(&$x)); )+
        hasher.finalize()
    }};
}

pub(crate) use sha1;
