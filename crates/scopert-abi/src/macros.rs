//! Helper macros for ABI function generation.
//!
//! Provides the `abi_fn!` macro that generates
//! `#[unsafe(no_mangle)] pub unsafe extern "C-unwind" fn` exports.

/// Generate an exported `extern "C-unwind"` function.
///
/// # Usage
///
/// ```ignore
/// abi_fn! {
///     /// Doc comment for the function.
///     fn scopert_example(arg: usize) -> usize {
///         arg
///     }
/// }
/// ```
///
/// The `C-unwind` ABI is required: a caught raise unwinds out of the exported
/// function back into the matching `scopert_try` frame.
macro_rules! abi_fn {
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? ) -> $ret:ty
        $body:block
    ) => {
        $(#[$meta])*
        #[unsafe(no_mangle)]
        #[allow(unused_unsafe)]
        pub unsafe extern "C-unwind" fn $name( $($arg : $argty),* ) -> $ret {
            unsafe { $body }
        }
    };

    // Variant without return type (returns ())
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? )
        $body:block
    ) => {
        $(#[$meta])*
        #[unsafe(no_mangle)]
        #[allow(unused_unsafe)]
        pub unsafe extern "C-unwind" fn $name( $($arg : $argty),* ) {
            unsafe { $body }
        }
    };
}

pub(crate) use abi_fn;
