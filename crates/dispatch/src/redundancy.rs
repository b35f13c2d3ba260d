//! Redundancy classes: results of one workunit should come from hosts whose
//! floating point behaviour is comparable, so the workunit is bound to the
//! class of the first host that gets it.

use volsched_core::{HostInfo, HrClass, HrType, HR_UNBOUND};

use crate::feasibility::RejectReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    Windows = 1,
    Linux = 2,
    Darwin = 3,
    FreeBsd = 4,
    Android = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuFamily {
    Intel = 1,
    Amd = 2,
    Apple = 3,
    Arm = 4,
    PowerPc = 5,
}

pub fn os_family(os_name: &str) -> Option<OsFamily> {
    let os = os_name.to_ascii_lowercase();
    // Android reports a Linux kernel, so it has to be matched first.
    if os.contains("android") {
        Some(OsFamily::Android)
    } else if os.contains("windows") || os.contains("microsoft") {
        Some(OsFamily::Windows)
    } else if os.contains("linux") {
        Some(OsFamily::Linux)
    } else if os.contains("darwin") || os.contains("mac os") || os.contains("macos") {
        Some(OsFamily::Darwin)
    } else if os.contains("freebsd") {
        Some(OsFamily::FreeBsd)
    } else {
        None
    }
}

pub fn cpu_family(vendor: &str, model: &str) -> Option<CpuFamily> {
    let v = vendor.to_ascii_lowercase();
    let m = model.to_ascii_lowercase();
    if v.contains("intel") {
        Some(CpuFamily::Intel)
    } else if v.contains("amd") {
        Some(CpuFamily::Amd)
    } else if v.contains("apple") || m.starts_with("apple m") {
        Some(CpuFamily::Apple)
    } else if v.contains("arm") || v.contains("qualcomm") || m.contains("aarch64") {
        Some(CpuFamily::Arm)
    } else if v.contains("powerpc") || v.contains("ppc") {
        Some(CpuFamily::PowerPc)
    } else {
        None
    }
}

/// The host's class under `hr_type`, or `None` if it can't be determined
/// (or the app doesn't use redundancy classes).
pub fn host_class(hr_type: HrType, host: &HostInfo) -> Option<HrClass> {
    match hr_type {
        HrType::None => None,
        HrType::Coarse => {
            // Classed by OS alone, but an unrecognised CPU still disqualifies.
            let os = os_family(&host.os_name)?;
            cpu_family(&host.p_vendor, &host.p_model)?;
            Some(os as HrClass * 64)
        }
        HrType::Fine => {
            let os = os_family(&host.os_name)?;
            let cpu = cpu_family(&host.p_vendor, &host.p_model)?;
            Some(os as HrClass * 64 + cpu as HrClass)
        }
    }
}

/// Can a host of `host_class` take a job whose workunit carries `wu_class`?
pub fn check(hr_type: HrType, wu_class: HrClass, host_class: Option<HrClass>) -> Result<(), RejectReason> {
    if hr_type == HrType::None {
        return Ok(());
    }
    match host_class {
        None => Err(RejectReason::HrClassUnknown),
        Some(_) if wu_class == HR_UNBOUND => Ok(()),
        Some(c) if c == wu_class => Ok(()),
        Some(_) => Err(RejectReason::HrClassMismatch),
    }
}
