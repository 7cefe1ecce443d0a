//! Collapsing callback result arguments into a single value.
//!
//! `()` becomes `()`, a one-element tuple becomes its element, and anything
//! longer stays the tuple it is, in argument order.

/// Result values delivered to a completion callback, after the error code.
pub trait CompletionArgs: Send + 'static {
    /// The value a fulfilled future carries.
    type Output: Send + 'static;

    /// Number of result values in the callback signature.
    const ARITY: usize;

    fn collapse(self) -> Self::Output;
}

impl CompletionArgs for () {
    type Output = ();
    const ARITY: usize = 0;

    fn collapse(self) -> Self::Output {}
}

impl<A: Send + 'static> CompletionArgs for (A,) {
    type Output = A;
    const ARITY: usize = 1;

    fn collapse(self) -> Self::Output {
        self.0
    }
}

macro_rules! impl_tuple_args {
    ($arity:expr; $($name:ident),+) => {
        impl<$($name: Send + 'static),+> CompletionArgs for ($($name,)+) {
            type Output = ($($name,)+);
            const ARITY: usize = $arity;

            fn collapse(self) -> Self::Output {
                self
            }
        }
    };
}

impl_tuple_args!(2; A, B);
impl_tuple_args!(3; A, B, C);
impl_tuple_args!(4; A, B, C, D);
impl_tuple_args!(5; A, B, C, D, E);
impl_tuple_args!(6; A, B, C, D, E, F);
