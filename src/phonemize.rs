//! Grapheme-to-phoneme conversion.
//!
//! The cleaner only sees the [`Phonemizer`] trait.  With the `espeak`
//! feature, [`EspeakPhonemizer`] drives the `libespeak-ng` C API directly
//! (no subprocess); linking is handled by build.rs.

/// Converts normalised text into an IPA-like phoneme string.
///
/// Implementations are loaded once per pipeline and then called from the
/// pacing engine's synthesis thread, hence `Send + Sync`.
pub trait Phonemizer: Send + Sync {
    fn phonemize(&self, text: &str, language: &str) -> anyhow::Result<String>;
}

/// Map a language code such as `en_us` to an espeak-ng voice name (`en-us`).
pub fn voice_for_language(language: &str) -> String {
    language.trim().replace('_', "-").to_ascii_lowercase()
}

/// Punctuation that G2P engines swallow but the acoustic model is trained on.
pub const PRESERVED_PUNCTUATION: &str = ".,!?;:()";

/// Phonemise the word runs between punctuation marks with `g2p` and put the
/// marks back where they were.
///
/// `"Hello, world."` becomes `"<Hello>, <world>."` where `<w>` is whatever
/// `g2p` returns for `w`.  Runs that are only whitespace are not passed to
/// `g2p`.
pub fn phonemize_preserving_punctuation<F>(text: &str, mut g2p: F) -> anyhow::Result<String>
where
    F: FnMut(&str) -> anyhow::Result<String>,
{
    let mut out = String::with_capacity(text.len() * 2);
    let mut run = String::new();
    for c in text.chars() {
        if PRESERVED_PUNCTUATION.contains(c) {
            flush_run(&mut out, &run, &mut g2p)?;
            run.clear();
            out.push(c);
        } else {
            run.push(c);
        }
    }
    flush_run(&mut out, &run, &mut g2p)?;
    Ok(out.trim_end().to_owned())
}

fn flush_run<F>(out: &mut String, run: &str, g2p: &mut F) -> anyhow::Result<()>
where
    F: FnMut(&str) -> anyhow::Result<String>,
{
    let words = run.trim();
    if words.is_empty() {
        if !run.is_empty() {
            push_space(out);
        }
        return Ok(());
    }
    if run.starts_with(char::is_whitespace) {
        push_space(out);
    }
    out.push_str(g2p(words)?.trim());
    if run.ends_with(char::is_whitespace) {
        push_space(out);
    }
    Ok(())
}

fn push_space(out: &mut String) {
    if !out.is_empty() && !out.ends_with(' ') {
        out.push(' ');
    }
}

#[cfg(feature = "espeak")]
pub use self::espeak::{is_espeak_available, set_data_path, EspeakPhonemizer};

#[cfg(feature = "espeak")]
mod espeak {
    use std::{
        ffi::{CStr, CString},
        os::raw::{c_char, c_int, c_void},
        path::{Path, PathBuf},
        sync::Mutex,
    };

    use anyhow::{anyhow, Result};
    use log::debug;
    use once_cell::sync::OnceCell;

    use super::{phonemize_preserving_punctuation, voice_for_language, Phonemizer};

    // ─── FFI bindings ─────────────────────────────────────────────────────────

    extern "C" {
        fn espeak_ng_InitializePath(path: *const c_char);
        fn espeak_ng_Initialize(context: *mut c_void) -> c_int;
        fn espeak_ng_SetVoiceByName(name: *const c_char) -> c_int;

        /// `textptr` advances past each translated clause and becomes `NULL`
        /// once the whole text is consumed.  The returned buffer is reused by
        /// the next call.
        fn espeak_TextToPhonemes(
            textptr: *mut *const c_void,
            textmode: c_int,
            phonememode: c_int,
        ) -> *const c_char;
    }

    const CHARS_UTF8: c_int = 1;
    const PHONEMES_IPA: c_int = 0x02;

    // ─── Global state ─────────────────────────────────────────────────────────

    /// espeak-ng keeps global state and is not thread-safe; every call goes
    /// through this lock.  The value is the currently selected voice.
    static LOCK: Mutex<Option<String>> = Mutex::new(None);

    static INIT: OnceCell<std::result::Result<(), String>> = OnceCell::new();

    static DATA_PATH: OnceCell<PathBuf> = OnceCell::new();

    /// Set the `espeak-ng-data` directory.  No effect after initialisation.
    pub fn set_data_path(path: &Path) {
        let _ = DATA_PATH.set(path.to_path_buf());
    }

    fn do_init() -> std::result::Result<(), String> {
        let path_cstr = match DATA_PATH.get() {
            Some(p) => Some(
                CString::new(p.to_string_lossy().as_bytes())
                    .map_err(|_| "espeak data path contains a null byte".to_string())?,
            ),
            None => None,
        };
        let path_ptr: *const c_char = path_cstr.as_ref().map_or(std::ptr::null(), |c| c.as_ptr());

        unsafe {
            espeak_ng_InitializePath(path_ptr);
            let status = espeak_ng_Initialize(std::ptr::null_mut());
            if status != 0 {
                return Err(format!("espeak_ng_Initialize failed (status {:#010x})", status));
            }
        }
        Ok(())
    }

    fn select_voice(current: &mut Option<String>, voice: &str) -> Result<()> {
        if current.as_deref() == Some(voice) {
            return Ok(());
        }
        let name = CString::new(voice).map_err(|_| anyhow!("voice name contains a null byte"))?;
        let rc = unsafe { espeak_ng_SetVoiceByName(name.as_ptr()) };
        if rc != 0 {
            return Err(anyhow!("espeak_ng_SetVoiceByName({:?}) failed (rc {})", voice, rc));
        }
        debug!("espeak-ng voice set to {voice}");
        *current = Some(voice.to_owned());
        Ok(())
    }

    /// Returns `true` if espeak-ng initialises successfully.
    pub fn is_espeak_available() -> bool {
        let _guard = LOCK.lock().unwrap_or_else(|p| p.into_inner());
        INIT.get_or_init(do_init).is_ok()
    }

    /// IPA phonemiser backed by libespeak-ng.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct EspeakPhonemizer;

    impl EspeakPhonemizer {
        /// Initialise the library and check that `language` maps to a voice.
        pub fn new(language: &str) -> Result<Self> {
            let mut current = LOCK.lock().unwrap_or_else(|p| p.into_inner());
            INIT.get_or_init(do_init)
                .as_ref()
                .map_err(|e| anyhow!("espeak-ng: {}", e))?;
            select_voice(&mut current, &voice_for_language(language))?;
            Ok(Self)
        }
    }

    impl Phonemizer for EspeakPhonemizer {
        fn phonemize(&self, text: &str, language: &str) -> Result<String> {
            let mut current = LOCK.lock().unwrap_or_else(|p| p.into_inner());
            INIT.get_or_init(do_init)
                .as_ref()
                .map_err(|e| anyhow!("espeak-ng: {}", e))?;
            select_voice(&mut current, &voice_for_language(language))?;

            // espeak ends a clause at each punctuation mark and drops the mark.
            phonemize_preserving_punctuation(text, |words| unsafe { text_to_phonemes(words) })
        }
    }

    /// Run `espeak_TextToPhonemes` over every clause of `text`.
    ///
    /// # Safety
    /// The caller must hold `LOCK` with the library initialised.
    unsafe fn text_to_phonemes(text: &str) -> Result<String> {
        let text_c =
            CString::new(text).map_err(|_| anyhow!("phonemize: text contains a null byte"))?;
        let mut cursor: *const c_void = text_c.as_ptr() as *const c_void;
        let mut parts: Vec<String> = Vec::new();

        while !cursor.is_null() {
            let phonemes_ptr = espeak_TextToPhonemes(&mut cursor, CHARS_UTF8, PHONEMES_IPA);
            if phonemes_ptr.is_null() {
                continue;
            }
            // Copy out before the next call overwrites the buffer.
            let chunk = CStr::from_ptr(phonemes_ptr)
                .to_str()
                .map_err(|_| anyhow!("espeak-ng returned non-UTF-8 phonemes"))?
                .trim()
                .to_owned();
            if !chunk.is_empty() {
                parts.push(chunk);
            }
        }

        Ok(parts.join(" "))
    }

}
