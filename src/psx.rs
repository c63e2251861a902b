//! PlayStation specific metadata

use std::fmt;
use std::io::{Read, Seek};
use std::ops::ControlFlow;
use std::sync::OnceLock;

use regex::Regex;

use crate::browser::ImageBrowser;
use crate::sector::XaForm;
use crate::{CdResult, Policy};

/// Message displayed by games that detect a modchip, US release
const ANTI_MODCHIP_EN: &[u8] =
    b"     SOFTWARE TERMINATED\nCONSOLE MAY HAVE BEEN MODIFIED\n     CALL 1-888-780-7690\0";

/// Message displayed by games that detect a modchip, Japanese release (Shift-JIS)
const ANTI_MODCHIP_JP: &[u8] = &[
    0x8b, 0xad, 0x90, 0xa7, 0x8f, 0x49, 0x97, 0xb9, 0x82, 0xb5, 0x82, 0xdc, 0x82, 0xb5, 0x82, 0xbd,
    0x81, 0x42, 0x0a, 0x96, 0x7b, 0x91, 0xcc, 0x82, 0xaa, 0x89, 0xfc, 0x91, 0xa2, 0x82, 0xb3, 0x82,
    0xea, 0x82, 0xc4, 0x82, 0xa2, 0x82, 0xe9, 0x0a, 0x82, 0xa8, 0x82, 0xbb, 0x82, 0xea, 0x82, 0xaa,
    0x82, 0xa0, 0x82, 0xe8, 0x82, 0xdc, 0x82, 0xb7, 0x81, 0x42,
];

fn boot_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();

    // BOOT = cdrom:\\SCUS_945.03;1
    // BOOT=cdrom:\SLPS_004.35
    // BOOT = cdrom:\EXE\PCPX_961.61;1
    RE.get_or_init(|| {
        Regex::new(r"^\s*BOOT.*=\s*cdrom.?:\\*(.*?)(?:;.*|\s*)$").expect("invalid BOOT regex")
    })
}

fn serial_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();

    RE.get_or_init(|| {
        Regex::new(r"^(?:.*\\)*([A-Z]{4})[_-]?([0-9]{3})\.([0-9]{2})$")
            .expect("invalid serial regex")
    })
}

/// Parse the executable path out of the content of a `SYSTEM.CNF` file
pub fn parse_system_cnf(data: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(data);

    text.lines()
        .find_map(|line| boot_regex().captures(line))
        .map(|c| c[1].to_uppercase())
}

/// Path of the boot executable: the BOOT line of `SYSTEM.CNF`, or `PSX.EXE` for early discs
/// without one. Returns `None` if neither can be found.
pub fn extract_exe_path<R: Read + Seek>(browser: &mut ImageBrowser<R>) -> CdResult<Option<String>> {
    let root = browser.root_directory();

    if let Some(system_cnf) = browser.sub_entry(&root, "SYSTEM.CNF")? {
        let data = browser.read(&system_cnf, XaForm::Form1, Policy::Lenient)?;
        let path = parse_system_cnf(&data);

        if path.is_none() {
            log::warn!("SYSTEM.CNF has no BOOT line");
        }

        return Ok(path);
    }

    Ok(browser
        .sub_entry(&root, "PSX.EXE")?
        .map(|e| e.name().to_string()))
}

/// Build the `ABCD-12345` serial out of an executable path such as `SLUS_012.34`
pub fn serial_from_exe_path(exe_path: &str) -> Option<String> {
    let c = serial_regex().captures(exe_path)?;

    Some(format!("{}-{}{}", &c[1], &c[2], &c[3]))
}

/// Serial number of the disc, derived from the boot executable name
pub fn extract_serial<R: Read + Seek>(browser: &mut ImageBrowser<R>) -> CdResult<Option<String>> {
    Ok(extract_exe_path(browser)?.and_then(|p| serial_from_exe_path(&p)))
}

/// Language of an anti-modchip message
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Language {
    /// English
    En,
    /// Japanese
    Jp,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Language::En => "EN",
            Language::Jp => "JP",
        })
    }
}

/// Anti-modchip message found in a file
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AntiModchip {
    /// Full path of the file
    pub path: String,
    /// Byte offset of the message in the file
    pub offset: usize,
    /// Message language
    pub language: Language,
}

impl fmt::Display for AntiModchip {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} @ 0x{:x}: {}", self.path, self.offset, self.language)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Search every file for the anti-modchip messages. Interleaved files (XA audio, STR video)
/// and placeholder records are skipped.
pub fn detect_anti_modchip<R: Read + Seek>(
    browser: &mut ImageBrowser<R>,
) -> CdResult<Vec<AntiModchip>> {
    let mut found = Vec::new();

    browser.iterate(|browser, path, entry| {
        if browser.is_dummy(entry) {
            log::debug!("skipping placeholder record '{}'", path);
            return Ok(ControlFlow::Continue(()));
        }

        if browser.is_interleaved(entry)? {
            return Ok(ControlFlow::Continue(()));
        }

        let data = browser.read(entry, XaForm::Form1, Policy::Lenient)?;

        let messages = [
            (ANTI_MODCHIP_EN, Language::En),
            (ANTI_MODCHIP_JP, Language::Jp),
        ];

        for (message, language) in messages {
            if let Some(offset) = find(&data, message) {
                found.push(AntiModchip {
                    path: path.to_string(),
                    offset,
                    language,
                });
            }
        }

        Ok(ControlFlow::Continue(()))
    })?;

    Ok(found)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn boot_line() {
        let cases: &[(&[u8], Option<&str>)] = &[
            (b"BOOT = cdrom:\\\\SCUS_945.03;1\r\nTCB = 4\r\n", Some("SCUS_945.03")),
            (b"BOOT=cdrom:\\SCUS_944.23;1", Some("SCUS_944.23")),
            (b"BOOT=cdrom:\\slps_004.35\r\n", Some("SLPS_004.35")),
            (b"TCB=4\nBOOT = cdrom:\\EXE\\PCPX_961.61;1\n", Some("EXE\\PCPX_961.61")),
            (b"  BOOT = cdrom0:\\SLPM803.96;1", Some("SLPM803.96")),
            (b"TCB=4\nEVENT=10\n", None),
        ];

        for &(cnf, exe) in cases {
            assert_eq!(parse_system_cnf(cnf).as_deref(), exe);
        }
    }

    #[test]
    fn serial() {
        assert_eq!(serial_from_exe_path("SCUS_945.03").as_deref(), Some("SCUS-94503"));
        assert_eq!(serial_from_exe_path("SLPM803.96").as_deref(), Some("SLPM-80396"));
        assert_eq!(serial_from_exe_path("EXE\\PCPX_961.61").as_deref(), Some("PCPX-96161"));
        assert_eq!(serial_from_exe_path("PSX.EXE"), None);
    }

    #[test]
    fn finding_display() {
        let f = AntiModchip {
            path: "SCUS_945.03".to_string(),
            offset: 0x1f2c4,
            language: Language::Jp,
        };

        assert_eq!(f.to_string(), "SCUS_945.03 @ 0x1f2c4: JP");
    }
}
