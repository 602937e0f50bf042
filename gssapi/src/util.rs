use gssapi_sys::{
    gss_buffer_desc, gss_buffer_desc_struct, gss_buffer_t, gss_release_buffer, OM_uint32,
    GSS_S_COMPLETE,
};
use std::{
    ffi, fmt,
    marker::PhantomData,
    ops::{Deref, Drop},
    ptr, slice,
};

/* Only pass this to routines that treat the buffer as input. C can't
 * be stopped from writing through the pointer, and the memory behind
 * it belongs to a rust slice. */
#[repr(transparent)]
#[derive(Debug)]
pub(crate) struct BufRef<'a>(gss_buffer_desc_struct, PhantomData<&'a [u8]>);

unsafe impl<'a> Send for BufRef<'a> {}
unsafe impl<'a> Sync for BufRef<'a> {}

impl<'a> Deref for BufRef<'a> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        if self.0.value.is_null() {
            &[]
        } else {
            unsafe { slice::from_raw_parts(self.0.value.cast(), self.0.length as usize) }
        }
    }
}

impl<'a> From<&'a [u8]> for BufRef<'a> {
    fn from(s: &'a [u8]) -> Self {
        let gss_buf = gss_buffer_desc_struct {
            length: s.len() as _,
            value: s.as_ptr() as *mut ffi::c_void,
        };
        BufRef(gss_buf, PhantomData)
    }
}

impl<'a> BufRef<'a> {
    pub(crate) unsafe fn to_c(&mut self) -> gss_buffer_t {
        &mut self.0 as gss_buffer_t
    }
}

/// An output buffer allocated by gssapi. It is handed back to the
/// library with `gss_release_buffer` when dropped.
#[repr(transparent)]
pub struct Buf(gss_buffer_desc);

unsafe impl Send for Buf {}
unsafe impl Sync for Buf {}

impl fmt::Debug for Buf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buf").field("len", &self.len()).finish()
    }
}

impl Deref for Buf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        if self.0.value.is_null() {
            &[]
        } else {
            unsafe { slice::from_raw_parts(self.0.value.cast(), self.0.length as usize) }
        }
    }
}

impl Drop for Buf {
    fn drop(&mut self) {
        if !self.0.value.is_null() {
            let mut minor = GSS_S_COMPLETE;
            let major = unsafe {
                gss_release_buffer(&mut minor as *mut OM_uint32, &mut self.0 as gss_buffer_t)
            };
            if major != GSS_S_COMPLETE {
                tracing::warn!(major, minor, "gss_release_buffer failed");
            }
        }
    }
}

impl Buf {
    pub(crate) fn empty() -> Buf {
        Buf(gss_buffer_desc {
            length: 0,
            value: ptr::null_mut(),
        })
    }

    pub(crate) unsafe fn to_c(&mut self) -> gss_buffer_t {
        &mut self.0 as gss_buffer_t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrowed_buffer_points_at_the_slice() {
        let msg = b"super secret message";
        let r = BufRef::from(&msg[..]);
        assert_eq!(&*r, &msg[..]);
        assert_eq!(r.0.length as usize, msg.len());
    }

    #[test]
    fn empty_output_buffer_is_an_empty_slice() {
        let mut b = Buf::empty();
        assert!(b.is_empty());
        assert_eq!(format!("{:?}", b), "Buf { len: 0 }");
        let c = unsafe { b.to_c() };
        assert!(unsafe { (*c).value.is_null() });
    }
}
