//! # Function
//!
//! Typed function pointers that a hook can target, detour to and call back into.
//!
//! The signature of a hook is fixed by its `F: Function` parameter, so the detour must have exactly
//! the target's type and the original is called with exactly the target's arguments.

/// Trait representing a function pointer type usable as a hook target or detour
///
/// # Safety
///
/// Implementors must be plain function pointers: `from_ptr` and `to_ptr` must round-trip the address
/// and `call` must perform a call with the pointer's ABI.
pub unsafe trait Function: Sized + Copy + Send + Sync + 'static {
    /// The argument types as a tuple
    type Arguments;

    /// The return type
    type Output;

    /// Constructs a function from an untyped pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must point to code with exactly this signature if the result is ever called
    unsafe fn from_ptr(ptr: *const ()) -> Self;

    /// Returns the untyped pointer for this function
    fn to_ptr(&self) -> *const ();

    /// Calls the function with a tuple of arguments.
    ///
    /// # Safety
    ///
    /// The function must be valid to call with these arguments; for `unsafe fn` types the caller
    /// also takes over that function's own safety contract
    unsafe fn call(self, args: Self::Arguments) -> Self::Output;
}

macro_rules! impl_function {
    (@recurse () ($($nm:ident : $ty:ident),*)) => {
        impl_function!(@impl_all ($($nm : $ty),*));
    };
    (@recurse
        ($hd_nm:ident : $hd_ty:ident $(, $tl_nm:ident : $tl_ty:ident)*)
        ($($nm:ident : $ty:ident),*)) => {
        impl_function!(@impl_all ($($nm : $ty),*));
        impl_function!(@recurse ($($tl_nm : $tl_ty),*) ($($nm : $ty,)* $hd_nm : $hd_ty));
    };

    (@impl_all ($($nm:ident : $ty:ident),*)) => {
        impl_function!(@impl_pair ($($nm : $ty),*) (                fn($($ty),*) -> Ret));
        impl_function!(@impl_pair ($($nm : $ty),*) (extern "C"      fn($($ty),*) -> Ret));
        impl_function!(@impl_pair ($($nm : $ty),*) (extern "system" fn($($ty),*) -> Ret));
    };

    (@impl_pair ($($nm:ident : $ty:ident),*) ($($fn_t:tt)*)) => {
        impl_function!(@impl_core ($($nm : $ty),*) ($($fn_t)*));
        impl_function!(@impl_core ($($nm : $ty),*) (unsafe $($fn_t)*));
    };

    (@impl_core ($($nm:ident : $ty:ident),*) ($fn_type:ty)) => {
        unsafe impl<Ret: 'static, $($ty: 'static),*> Function for $fn_type {
            type Arguments = ($($ty,)*);
            type Output = Ret;

            unsafe fn from_ptr(ptr: *const ()) -> Self {
                ::core::mem::transmute(ptr)
            }

            fn to_ptr(&self) -> *const () {
                *self as *const ()
            }

            #[allow(clippy::unused_unit)]
            unsafe fn call(self, args: Self::Arguments) -> Self::Output {
                let ($($nm,)*) = args;
                (self)($($nm),*)
            }
        }
    };

    ($($nm:ident : $ty:ident),*) => {
        impl_function!(@recurse ($($nm : $ty),*) ());
    };
}

impl_function! {
    __arg_0: A, __arg_1: B, __arg_2: C, __arg_3: D, __arg_4: E, __arg_5: F,
    __arg_6: G, __arg_7: H, __arg_8: I, __arg_9: J, __arg_10: K, __arg_11: L
}

#[cfg(test)]
mod tests {
    use super::Function;

    fn triple(value: u32) -> u32 {
        value * 3
    }

    extern "C" fn join(a: u8, b: u8, c: u8) -> u32 {
        u32::from_le_bytes([a, b, c, 0])
    }

    #[test]
    /// Pointers survive the trip through an untyped address
    fn test_round_trip() {
        let f = triple as fn(u32) -> u32;
        let restored = unsafe { <fn(u32) -> u32>::from_ptr(f.to_ptr()) };
        assert_eq!(restored.to_ptr(), f.to_ptr());
        assert_eq!(restored(4), 12);
    }

    #[test]
    /// Tuple arguments are spread in order
    fn test_call_spreads_arguments() {
        let f = join as extern "C" fn(u8, u8, u8) -> u32;
        assert_eq!(unsafe { f.call((1, 2, 3)) }, 0x03_02_01);
    }

    #[test]
    /// Zero-argument and unit-returning functions are supported
    fn test_unit_signature() {
        extern "system" fn noop() {}
        let f = noop as unsafe extern "system" fn();
        let () = unsafe { Function::call(f, ()) };
    }
}
