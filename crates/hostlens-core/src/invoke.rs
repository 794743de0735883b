//! # Native Invocation
//!
//! Calls a resolved, non-exported function with the host's member-function
//! convention: receiver first, then pointer-sized argument slots, C ABI.
//! On x86-64 SysV and Win64 a C++ member function is exactly that.
//!
//! Nothing here can check that the callee really has the signature the caller
//! assumes; a mismatch is undefined behaviour, which is why every call is an
//! `unsafe fn`.

use std::mem;

use tracing::trace;

use crate::error::{LensError, Result};
use crate::types::Address;

/// Receiver plus arguments, in slots
pub const MAX_SLOTS: usize = 6;

/// Conversion from the raw return register
pub trait NativeReturn: Sized
{
    fn from_raw(raw: usize) -> Self;
}

impl NativeReturn for ()
{
    fn from_raw(_raw: usize) -> Self {}
}

impl NativeReturn for bool
{
    fn from_raw(raw: usize) -> Self
    {
        // C++ `bool` only defines the low byte of the return register.
        raw as u8 != 0
    }
}

impl NativeReturn for Address
{
    fn from_raw(raw: usize) -> Self
    {
        Address::from(raw)
    }
}

macro_rules! impl_native_return {
    ($($ty:ty),* $(,)?) => {
        $(
            impl NativeReturn for $ty
            {
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                fn from_raw(raw: usize) -> Self
                {
                    raw as $ty
                }
            }
        )*
    };
}

impl_native_return!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

/// Performs native calls through resolved addresses
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeInvoker;

impl NativeInvoker
{
    /// Call `address` as a member function of `receiver`
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::TooManyArguments`] if `1 + args.len()` exceeds [`MAX_SLOTS`].
    ///
    /// ## Panics
    ///
    /// If `address` is null. Calling an unresolved import is a bug in the caller.
    ///
    /// ## Safety
    ///
    /// `address` must be a function taking `1 + args.len()` pointer-sized
    /// integer or pointer parameters and returning something `R` can be read
    /// from, and `receiver` and `args` must be valid for it.
    pub unsafe fn call<R: NativeReturn>(address: Address, receiver: Address, args: &[usize]) -> Result<R>
    {
        let mut slots = [0usize; MAX_SLOTS];
        let given = args.len() + 1;
        if given > MAX_SLOTS {
            return Err(LensError::TooManyArguments { given, max: MAX_SLOTS });
        }
        slots[0] = receiver.as_usize();
        slots[1..given].copy_from_slice(args);
        // SAFETY: forwarded from the caller.
        Ok(R::from_raw(unsafe { dispatch(address, &slots[..given]) }))
    }

    /// Call `address` as a free function
    ///
    /// ## Errors
    ///
    /// Returns [`LensError::TooManyArguments`] if `args.len()` exceeds [`MAX_SLOTS`].
    ///
    /// ## Panics
    ///
    /// If `address` is null.
    ///
    /// ## Safety
    ///
    /// As for [`NativeInvoker::call`], without the receiver.
    pub unsafe fn call_static<R: NativeReturn>(address: Address, args: &[usize]) -> Result<R>
    {
        if args.len() > MAX_SLOTS {
            return Err(LensError::TooManyArguments {
                given: args.len(),
                max: MAX_SLOTS,
            });
        }
        // SAFETY: forwarded from the caller.
        Ok(R::from_raw(unsafe { dispatch(address, args) }))
    }
}

type Fn0 = extern "C" fn() -> usize;
type Fn1 = extern "C" fn(usize) -> usize;
type Fn2 = extern "C" fn(usize, usize) -> usize;
type Fn3 = extern "C" fn(usize, usize, usize) -> usize;
type Fn4 = extern "C" fn(usize, usize, usize, usize) -> usize;
type Fn5 = extern "C" fn(usize, usize, usize, usize, usize) -> usize;
type Fn6 = extern "C" fn(usize, usize, usize, usize, usize, usize) -> usize;

unsafe fn dispatch(address: Address, slots: &[usize]) -> usize
{
    assert!(!address.is_null(), "native call through a null address");
    trace!(%address, slots = slots.len(), "native call");

    let code = address.as_usize() as *const ();
    // SAFETY: the caller guarantees `code` is a function of this arity.
    unsafe {
        match *slots {
            [] => mem::transmute::<*const (), Fn0>(code)(),
            [a] => mem::transmute::<*const (), Fn1>(code)(a),
            [a, b] => mem::transmute::<*const (), Fn2>(code)(a, b),
            [a, b, c] => mem::transmute::<*const (), Fn3>(code)(a, b, c),
            [a, b, c, d] => mem::transmute::<*const (), Fn4>(code)(a, b, c, d),
            [a, b, c, d, e] => mem::transmute::<*const (), Fn5>(code)(a, b, c, d, e),
            [a, b, c, d, e, f] => mem::transmute::<*const (), Fn6>(code)(a, b, c, d, e, f),
            _ => unreachable!("slot count checked by callers"),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    extern "C" fn field_bytes(receiver: usize) -> usize
    {
        receiver.wrapping_add(0x18)
    }

    extern "C" fn is_odd(value: usize) -> usize
    {
        // Garbage above the low byte must be ignored.
        0xdead_be00 | (value & 1)
    }

    #[test]
    fn test_call_passes_receiver()
    {
        let address = Address::from(field_bytes as usize);
        let result: u32 = unsafe { NativeInvoker::call(address, Address::new(0x100), &[]) }.unwrap();
        assert_eq!(result, 0x118);
    }

    #[test]
    fn test_bool_uses_low_byte()
    {
        let address = Address::from(is_odd as usize);
        let odd: bool = unsafe { NativeInvoker::call_static(address, &[3]) }.unwrap();
        let even: bool = unsafe { NativeInvoker::call_static(address, &[4]) }.unwrap();
        assert!(odd);
        assert!(!even);
    }

    #[test]
    fn test_too_many_arguments()
    {
        let address = Address::from(field_bytes as usize);
        let result = unsafe { NativeInvoker::call::<()>(address, Address::new(1), &[1, 2, 3, 4, 5, 6]) };
        assert!(matches!(result, Err(LensError::TooManyArguments { given: 7, max: 6 })));
    }

    #[test]
    #[should_panic(expected = "null address")]
    fn test_null_address_panics()
    {
        let _ = unsafe { NativeInvoker::call_static::<()>(Address::ZERO, &[]) };
    }
}
