//! `wldap32` bindings behind [`LdapApi`].
//!
//! Handles cross the trait as addresses. The guards in the parent module make sure each one
//! is passed back to the library only while it is live, and freed exactly once.

use super::{Handle, LdapApi};
use std::ffi::c_void;
use std::ptr;
use windows_sys::Win32::Networking::Ldap::{
    ber_free, ldap_bind_sW, ldap_connect, ldap_count_valuesW, ldap_first_attributeW,
    ldap_first_entry, ldap_get_values_lenW, ldap_get_valuesW, ldap_initW, ldap_memfreeW,
    ldap_msgfree, ldap_next_attributeW, ldap_next_entry, ldap_search_sW, ldap_set_option,
    ldap_unbind, ldap_value_freeW, ldap_value_free_len, BerElement, LdapGetLastError,
    LDAPMessage, LDAP_BERVAL,
};

const OPT_REFERRALS: i32 = 0x08;
const AUTH_NEGOTIATE: u32 = 0x0486;

pub(crate) struct Wldap32;

fn raw<T>(handle: Handle) -> *mut T {
    handle.0 as *mut T
}

fn handle<T>(pointer: *mut T) -> Handle {
    Handle(pointer as usize)
}

fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Reads a NUL-terminated UTF-16 string.
///
/// # Safety
///
/// `value` must be null or point to a readable NUL-terminated UTF-16 buffer.
unsafe fn from_wide(value: *const u16) -> String {
    if value.is_null() {
        return String::new();
    }
    let mut len = 0;
    // SAFETY: the caller guarantees a terminator within the buffer.
    while unsafe { *value.add(len) } != 0 {
        len += 1;
    }
    // SAFETY: `len` units before the terminator were just read.
    String::from_utf16_lossy(unsafe { std::slice::from_raw_parts(value, len) })
}

impl LdapApi for Wldap32 {
    fn init(&self, host: &str, port: u16) -> Handle {
        let host = (!host.is_empty()).then(|| to_wide(host));
        let host_ptr = host.as_ref().map_or(ptr::null(), |host| host.as_ptr());
        // SAFETY: `host_ptr` is null (default domain controller) or a NUL-terminated buffer
        // that outlives the call.
        handle(unsafe { ldap_initW(host_ptr, u32::from(port)) })
    }

    fn last_error(&self) -> u32 {
        // SAFETY: no preconditions.
        unsafe { LdapGetLastError() }
    }

    fn set_option(&self, session: Handle, option: i32, value: u32) -> u32 {
        // SAFETY: the session is live and `value` is a ULONG the call only reads.
        unsafe { ldap_set_option(raw(session), option, ptr::addr_of!(value).cast::<c_void>()) }
    }

    fn disable_referrals(&self, session: Handle) -> u32 {
        // SAFETY: a null value is LDAP_OPT_OFF for this option.
        unsafe { ldap_set_option(raw(session), OPT_REFERRALS, ptr::null()) }
    }

    fn connect(&self, session: Handle) -> u32 {
        // SAFETY: the session is live; a null timeout uses the library default.
        unsafe { ldap_connect(raw(session), ptr::null_mut()) }
    }

    fn bind_negotiate(&self, session: Handle) -> u32 {
        // SAFETY: null identity and credential select the calling process's credentials.
        unsafe { ldap_bind_sW(raw(session), ptr::null(), ptr::null(), AUTH_NEGOTIATE) }
    }

    fn search(
        &self,
        session: Handle,
        base_dn: &str,
        scope: u32,
        filter: &str,
        attributes: &[String],
        message: &mut Handle,
    ) -> u32 {
        let base_dn = to_wide(base_dn);
        let filter = to_wide(filter);
        let attributes: Vec<Vec<u16>> = attributes.iter().map(|name| to_wide(name)).collect();
        let mut attribute_ptrs: Vec<*const u16> =
            attributes.iter().map(|name| name.as_ptr()).collect();
        attribute_ptrs.push(ptr::null());

        let mut result: *mut LDAPMessage = ptr::null_mut();
        // SAFETY: every string is NUL-terminated and the attribute array is null-terminated;
        // all of them outlive the call.
        let code = unsafe {
            ldap_search_sW(
                raw(session),
                base_dn.as_ptr(),
                scope,
                filter.as_ptr(),
                attribute_ptrs.as_ptr(),
                0,
                &mut result,
            )
        };
        *message = handle(result);
        code
    }

    fn first_entry(&self, session: Handle, message: Handle) -> Handle {
        // SAFETY: the message is live.
        handle(unsafe { ldap_first_entry(raw(session), raw(message)) })
    }

    fn next_entry(&self, session: Handle, entry: Handle) -> Handle {
        // SAFETY: the entry belongs to a live message.
        handle(unsafe { ldap_next_entry(raw(session), raw(entry)) })
    }

    fn first_attribute(&self, session: Handle, entry: Handle, ber: &mut Handle) -> Handle {
        let mut cursor: *mut BerElement = ptr::null_mut();
        // SAFETY: the entry is live; `cursor` receives a BER element the caller must free.
        let name = unsafe { ldap_first_attributeW(raw(session), raw(entry), &mut cursor) };
        *ber = handle(cursor);
        handle(name)
    }

    fn next_attribute(&self, session: Handle, entry: Handle, ber: Handle) -> Handle {
        // SAFETY: the cursor was produced by `ldap_first_attributeW` for this entry.
        handle(unsafe { ldap_next_attributeW(raw(session), raw(entry), raw(ber)) })
    }

    fn attribute_name(&self, name: Handle) -> String {
        // SAFETY: the name is a live NUL-terminated string.
        unsafe { from_wide(raw::<u16>(name)) }
    }

    fn text_values(&self, session: Handle, entry: Handle, name: Handle) -> Handle {
        // SAFETY: entry and attribute name are live.
        handle(unsafe { ldap_get_valuesW(raw(session), raw(entry), raw::<u16>(name)) })
    }

    fn first_text_value(&self, values: Handle) -> Option<String> {
        let values = raw::<*mut u16>(values);
        // SAFETY: `values` is a live, null-terminated value array.
        if unsafe { ldap_count_valuesW(values as _) } == 0 {
            return Some(String::new());
        }
        // SAFETY: the array has at least one element.
        Some(unsafe { from_wide(*values) })
    }

    fn binary_values(&self, session: Handle, entry: Handle, name: Handle) -> Handle {
        // SAFETY: entry and attribute name are live.
        handle(unsafe { ldap_get_values_lenW(raw(session), raw(entry), raw::<u16>(name)) })
    }

    fn first_binary_value(&self, values: Handle) -> Option<Vec<u8>> {
        let values = raw::<*mut LDAP_BERVAL>(values);
        // SAFETY: the array is null-terminated, so reading its first slot is valid.
        let first = unsafe { *values };
        if first.is_null() {
            return Some(Vec::new());
        }
        // SAFETY: `first` points to a live berval owned by the value array.
        let berval: &LDAP_BERVAL = unsafe { &*first };
        if berval.bv_val.is_null() || berval.bv_len == 0 {
            return Some(Vec::new());
        }
        // SAFETY: the berval describes `bv_len` readable bytes.
        let bytes = unsafe {
            std::slice::from_raw_parts(berval.bv_val.cast::<u8>(), berval.bv_len as usize)
        };
        Some(bytes.to_vec())
    }

    fn free_attribute_name(&self, name: Handle) {
        // SAFETY: the name came from the attribute iterator and is freed once.
        unsafe { ldap_memfreeW(raw::<u16>(name)) };
    }

    fn free_text_values(&self, values: Handle) -> u32 {
        // SAFETY: the array came from `ldap_get_valuesW` and is freed once.
        unsafe { ldap_value_freeW(raw::<*mut u16>(values) as _) }
    }

    fn free_binary_values(&self, values: Handle) -> u32 {
        // SAFETY: the array came from `ldap_get_values_lenW` and is freed once.
        unsafe { ldap_value_free_len(raw(values)) }
    }

    fn free_ber(&self, ber: Handle) {
        // SAFETY: the cursor is released once; its buffer belongs to the message.
        unsafe { ber_free(raw(ber), 0) };
    }

    fn free_message(&self, message: Handle) -> u32 {
        // SAFETY: the message came from `ldap_search_sW` and is freed once, before the
        // session that owns it.
        unsafe { ldap_msgfree(raw(message)) }
    }

    fn unbind(&self, session: Handle) -> u32 {
        // SAFETY: the session came from `ldap_initW` and is released exactly once.
        unsafe { ldap_unbind(raw(session)) }
    }
}
