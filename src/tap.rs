use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::FromRawFd;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::port::{Frame, Port};

const IFNAMSIZ: usize = libc::IFNAMSIZ;
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;
const TUNSETIFF: libc::c_ulong = 0x400454ca;

#[repr(C)]
struct IfReqFlags {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 24 - std::mem::size_of::<libc::c_short>()],
}

#[repr(C)]
struct IfReqMtu {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_mtu: libc::c_int,
    _pad: [u8; 24 - std::mem::size_of::<libc::c_int>()],
}

/// Port backed by a kernel TAP device carrying raw Ethernet frames.
pub struct TapPort {
    name: String,
    mtu: u16,
    device: File,
}

impl TapPort {
    /// Opens the named TAP device in Ethernet mode, sets the link MTU and
    /// brings the link up.
    pub fn open(requested_name: &str, mtu: u16) -> Result<Self> {
        let (device, name) = create_tap(requested_name)
            .with_context(|| format!("failed to create TAP device {requested_name}"))?;
        set_link_mtu(&name, mtu).with_context(|| format!("failed to set MTU on {name}"))?;
        set_link_up(&name).with_context(|| format!("failed to bring up {name}"))?;
        info!("opened TAP device name={name} mtu={mtu}");
        Ok(TapPort { name, mtu, device })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Port for TapPort {
    fn read(&self) -> Result<Frame> {
        let mut frame = vec![0u8; usize::from(self.mtu)];
        let n = (&self.device)
            .read(&mut frame)
            .with_context(|| format!("read from TAP {} failed", self.name))?;
        frame.truncate(n);
        Ok(frame)
    }

    fn write(&self, frame: &[u8]) -> Result<()> {
        (&self.device)
            .write_all(frame)
            .with_context(|| format!("write to TAP {} failed", self.name))
    }

    // The device fd is released when the switch drops its last handle.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn create_tap(requested_name: &str) -> Result<(File, String)> {
    let fd = unsafe { libc::open(c"/dev/net/tun".as_ptr(), libc::O_RDWR) };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }

    let mut ifr = IfReqFlags {
        ifr_name: [0; IFNAMSIZ],
        ifr_flags: IFF_TAP | IFF_NO_PI,
        _pad: [0; 24 - std::mem::size_of::<libc::c_short>()],
    };
    write_ifname(&mut ifr.ifr_name, requested_name)?;

    let ret = unsafe { libc::ioctl(fd, TUNSETIFF as _, &ifr) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(fd);
        }
        return Err(err.into());
    }

    let device = unsafe { File::from_raw_fd(fd) };
    let name = ifname_from_c(&ifr.ifr_name);
    Ok((device, name))
}

fn set_link_mtu(if_name: &str, mtu: u16) -> Result<()> {
    let s = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if s < 0 {
        return Err(io::Error::last_os_error().into());
    }

    let mut ifr = IfReqMtu {
        ifr_name: [0; IFNAMSIZ],
        ifr_mtu: libc::c_int::from(mtu),
        _pad: [0; 24 - std::mem::size_of::<libc::c_int>()],
    };
    write_ifname(&mut ifr.ifr_name, if_name)?;

    let ret = unsafe { libc::ioctl(s, libc::SIOCSIFMTU as _, &ifr) };
    let close_ret = unsafe { libc::close(s) };
    if ret < 0 {
        return Err(io::Error::last_os_error().into());
    }
    if close_ret < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

fn set_link_up(if_name: &str) -> Result<()> {
    let s = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if s < 0 {
        return Err(io::Error::last_os_error().into());
    }

    let up_result = (|| -> Result<()> {
        let mut ifr = IfReqFlags {
            ifr_name: [0; IFNAMSIZ],
            ifr_flags: 0,
            _pad: [0; 24 - std::mem::size_of::<libc::c_short>()],
        };
        write_ifname(&mut ifr.ifr_name, if_name)?;

        let ret = unsafe { libc::ioctl(s, libc::SIOCGIFFLAGS as _, &mut ifr) };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }

        ifr.ifr_flags |= libc::IFF_UP as libc::c_short;
        let ret = unsafe { libc::ioctl(s, libc::SIOCSIFFLAGS as _, &ifr) };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    })();

    let close_ret = unsafe { libc::close(s) };
    up_result?;
    if close_ret < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

fn write_ifname(dst: &mut [libc::c_char; IFNAMSIZ], name: &str) -> Result<()> {
    if name.len() >= IFNAMSIZ {
        bail!("interface name too long: {name}");
    }
    for b in dst.iter_mut() {
        *b = 0;
    }
    for (i, b) in name.as_bytes().iter().enumerate() {
        dst[i] = *b as libc::c_char;
    }
    Ok(())
}

fn ifname_from_c(src: &[libc::c_char; IFNAMSIZ]) -> String {
    let bytes: Vec<u8> = src
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as u8)
        .collect();
    String::from_utf8_lossy(&bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlong_interface_name() {
        let mut dst = [0 as libc::c_char; IFNAMSIZ];
        let long = "x".repeat(IFNAMSIZ);
        assert!(write_ifname(&mut dst, &long).is_err());
    }

    #[test]
    fn ifname_roundtrips_through_c_buffer() {
        let mut dst = [0 as libc::c_char; IFNAMSIZ];
        write_ifname(&mut dst, "tap0").unwrap();
        assert_eq!(ifname_from_c(&dst), "tap0");
    }
}
