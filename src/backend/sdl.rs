//! SDL 1.2 音频后端
//!
//! 运行时通过 libloading 加载系统 SDL 库并解析所需入口点，
//! 没有 SDL 的机器上可以正常启动，只是初始化失败。
//!
//! SDL 1.2 全进程只有一个音频设备，这里用一个进程级标志保证
//! 同一时刻最多一个已打开的设备。

use std::ffi::{c_char, c_int, c_void, CStr};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use libloading::Library;

use super::{AudioBackend, BackendError, DeviceSpec, StreamCallback};
use crate::audio::SampleFormat;

/// 覆盖库路径的环境变量
///
/// 未做任何校验，只能在可信环境中使用
pub const LIBRARY_ENV: &str = "SND_DMA_SDL_LIB";

#[cfg(target_os = "macos")]
pub const DEFAULT_LIBRARY: &str = "libSDL.dylib";
#[cfg(windows)]
pub const DEFAULT_LIBRARY: &str = "SDL.dll";
#[cfg(not(any(target_os = "macos", windows)))]
pub const DEFAULT_LIBRARY: &str = "libSDL.so";

const SDL_INIT_AUDIO: u32 = 0x0000_0010;

const AUDIO_U8: u16 = 0x0008;
const AUDIO_S16LSB: u16 = 0x8010;
const AUDIO_S16MSB: u16 = 0x9010;
#[cfg(target_endian = "little")]
const AUDIO_S16SYS: u16 = AUDIO_S16LSB;
#[cfg(target_endian = "big")]
const AUDIO_S16SYS: u16 = AUDIO_S16MSB;

/// 进程内是否已有打开的设备
static DEVICE_CLAIMED: AtomicBool = AtomicBool::new(false);

type AudioCallback = unsafe extern "C" fn(*mut c_void, *mut u8, c_int);

/// SDL_AudioSpec（SDL 1.2 布局）
#[repr(C)]
#[allow(dead_code)]
struct SdlAudioSpec {
    freq: c_int,
    format: u16,
    channels: u8,
    silence: u8,
    samples: u16,
    padding: u16,
    size: u32,
    callback: Option<AudioCallback>,
    userdata: *mut c_void,
}

impl SdlAudioSpec {
    fn zeroed() -> Self {
        Self {
            freq: 0,
            format: 0,
            channels: 0,
            silence: 0,
            samples: 0,
            padding: 0,
            size: 0,
            callback: None,
            userdata: ptr::null_mut(),
        }
    }
}

/// 已解析的 SDL 入口点
///
/// 函数指针只在 `_library` 存活期间有效，`_library` 最后析构
struct SdlApi {
    init: unsafe extern "C" fn(u32) -> c_int,
    was_init: unsafe extern "C" fn(u32) -> u32,
    get_error: unsafe extern "C" fn() -> *const c_char,
    quit_subsystem: unsafe extern "C" fn(u32),
    open_audio: unsafe extern "C" fn(*mut SdlAudioSpec, *mut SdlAudioSpec) -> c_int,
    audio_driver_name: unsafe extern "C" fn(*mut c_char, c_int) -> *mut c_char,
    pause_audio: unsafe extern "C" fn(c_int),
    lock_audio: unsafe extern "C" fn(),
    unlock_audio: unsafe extern "C" fn(),
    close_audio: unsafe extern "C" fn(),
    _library: Library,
}

/// 解析单个入口点
///
/// # Safety
///
/// `T` 必须与库中符号的真实签名一致
unsafe fn symbol<T: Copy>(library: &Library, name: &'static str) -> Result<T, BackendError> {
    library
        .get::<T>(name.as_bytes())
        .map(|sym| *sym)
        .map_err(|source| BackendError::MissingSymbol { name, source })
}

impl SdlApi {
    fn load(path: &Path) -> Result<Self, BackendError> {
        // SAFETY: 加载系统 SDL 库，其初始化例程没有额外前置条件
        let library = unsafe { Library::new(path) }.map_err(|source| BackendError::LibraryLoad {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: 签名与 SDL 1.2 头文件一致；library 随 SdlApi 一起保存
        unsafe {
            Ok(Self {
                init: symbol(&library, "SDL_Init")?,
                was_init: symbol(&library, "SDL_WasInit")?,
                get_error: symbol(&library, "SDL_GetError")?,
                quit_subsystem: symbol(&library, "SDL_QuitSubSystem")?,
                open_audio: symbol(&library, "SDL_OpenAudio")?,
                audio_driver_name: symbol(&library, "SDL_AudioDriverName")?,
                pause_audio: symbol(&library, "SDL_PauseAudio")?,
                lock_audio: symbol(&library, "SDL_LockAudio")?,
                unlock_audio: symbol(&library, "SDL_UnlockAudio")?,
                close_audio: symbol(&library, "SDL_CloseAudio")?,
                _library: library,
            })
        }
    }

    fn last_error(&self) -> String {
        // SAFETY: SDL_GetError 返回 SDL 内部的静态缓冲区
        unsafe {
            let msg = (self.get_error)();
            if msg.is_null() {
                String::from("unknown error")
            } else {
                CStr::from_ptr(msg).to_string_lossy().into_owned()
            }
        }
    }
}

/// 解析库路径：显式配置 > 环境变量 > 平台默认
pub fn resolve_library_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(LIBRARY_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LIBRARY))
}

fn encode_format(format: SampleFormat) -> u16 {
    match format {
        SampleFormat::U8 => AUDIO_U8,
        SampleFormat::S16 => AUDIO_S16SYS,
    }
}

/// 只接受无符号 8 位和本机字节序的有符号 16 位
fn decode_format(word: u16) -> Option<SampleFormat> {
    match word {
        AUDIO_U8 => Some(SampleFormat::U8),
        AUDIO_S16SYS => Some(SampleFormat::S16),
        _ => None,
    }
}

/// SDL 回调入口
///
/// 调用时 SDL 已持有音频锁
unsafe extern "C" fn audio_callback(userdata: *mut c_void, stream: *mut u8, len: c_int) {
    if stream.is_null() || len <= 0 {
        return;
    }

    let out = std::slice::from_raw_parts_mut(stream, len as usize);
    if userdata.is_null() {
        out.fill(0);
        return;
    }

    let callback = &mut *(userdata as *mut StreamCallback);
    callback(out);
}

/// SDL 1.2 后端
pub struct SdlBackend {
    library_path: PathBuf,
    api: Option<SdlApi>,
    /// 回调地址作为 userdata 交给 SDL，设备打开期间不可移动
    callback: Option<Box<StreamCallback>>,
    subsystem_started: bool,
    device_open: bool,
}

impl SdlBackend {
    pub fn new(library: Option<PathBuf>) -> Self {
        Self {
            library_path: resolve_library_path(library),
            api: None,
            callback: None,
            subsystem_started: false,
            device_open: false,
        }
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    fn api(&self) -> Result<&SdlApi, BackendError> {
        self.api
            .as_ref()
            .ok_or_else(|| BackendError::InitFailed("SDL library not loaded".into()))
    }

    fn release_claim(&mut self) {
        if self.device_open {
            DEVICE_CLAIMED.store(false, Ordering::Release);
            self.device_open = false;
        }
    }
}

impl AudioBackend for SdlBackend {
    fn init(&mut self) -> Result<(), BackendError> {
        if self.api.is_none() {
            log::debug!("Loading SDL from {}", self.library_path().display());
            self.api = Some(SdlApi::load(&self.library_path)?);
        }

        let api = self.api()?;
        // SAFETY: 入口点已解析
        unsafe {
            if (api.was_init)(SDL_INIT_AUDIO) == 0 && (api.init)(SDL_INIT_AUDIO) == -1 {
                return Err(BackendError::InitFailed(api.last_error()));
            }
        }

        self.subsystem_started = true;
        Ok(())
    }

    fn driver_name(&self) -> Result<String, BackendError> {
        let api = self.api()?;
        let mut buf = [0 as c_char; 128];

        // SAFETY: buf 长度与传入的 maxlen 一致，SDL 保证以 NUL 结尾
        unsafe {
            if (api.audio_driver_name)(buf.as_mut_ptr(), buf.len() as c_int).is_null() {
                return Err(BackendError::NoDriver);
            }
            Ok(CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned())
        }
    }

    fn open(
        &mut self,
        desired: &DeviceSpec,
        callback: StreamCallback,
    ) -> Result<DeviceSpec, BackendError> {
        let open_audio = self.api()?.open_audio;

        if self.device_open {
            return Err(BackendError::DeviceBusy);
        }
        if DEVICE_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BackendError::DeviceBusy);
        }
        self.device_open = true;

        let mut boxed = Box::new(callback);
        let userdata = &mut *boxed as *mut StreamCallback as *mut c_void;
        self.callback = Some(boxed);

        let mut wanted = SdlAudioSpec::zeroed();
        wanted.freq = desired.sample_rate as c_int;
        wanted.format = encode_format(desired.format);
        wanted.channels = desired.channels.min(u8::MAX as u16) as u8;
        wanted.samples = desired.period_frames.min(u16::MAX as u32) as u16;
        wanted.callback = Some(audio_callback);
        wanted.userdata = userdata;

        let mut obtained = SdlAudioSpec::zeroed();

        // SAFETY: 两个 spec 都在栈上存活到调用结束；userdata 指向堆上的回调
        let result = unsafe { open_audio(&mut wanted, &mut obtained) };

        if result == -1 {
            let message = self
                .api()
                .map(SdlApi::last_error)
                .unwrap_or_else(|e| e.to_string());
            self.callback = None;
            self.release_claim();
            return Err(BackendError::OpenFailed(message));
        }

        let format = match decode_format(obtained.format) {
            Some(format) => format,
            None => {
                self.close_device();
                return Err(BackendError::UnsupportedFormat(format!(
                    "format 0x{:04x}",
                    obtained.format
                )));
            }
        };

        if obtained.format != wanted.format {
            log::warn!(
                "SDL granted format 0x{:04x} instead of 0x{:04x}",
                obtained.format,
                wanted.format
            );
        }

        Ok(DeviceSpec {
            sample_rate: obtained.freq.max(0) as u32,
            format,
            channels: obtained.channels as u16,
            period_frames: obtained.samples as u32,
        })
    }

    fn pause(&mut self, paused: bool) {
        if let Ok(api) = self.api() {
            // SAFETY: 入口点已解析
            unsafe { (api.pause_audio)(paused as c_int) };
        }
    }

    fn lock(&self) {
        if let Ok(api) = self.api() {
            // SAFETY: 入口点已解析
            unsafe { (api.lock_audio)() };
        }
    }

    unsafe fn unlock(&self) {
        if let Ok(api) = self.api() {
            (api.unlock_audio)();
        }
    }

    fn close(&mut self) {
        self.close_device();

        if self.subsystem_started {
            if let Ok(api) = self.api() {
                // SAFETY: 入口点已解析
                unsafe { (api.quit_subsystem)(SDL_INIT_AUDIO) };
            }
            self.subsystem_started = false;
        }
    }
}

impl SdlBackend {
    /// 先暂停再关闭设备，之后才能释放回调
    fn close_device(&mut self) {
        if self.device_open {
            if let Ok(api) = self.api() {
                // SAFETY: 入口点已解析；SDL_CloseAudio 返回后回调不会再被调用
                unsafe {
                    (api.pause_audio)(1);
                    (api.close_audio)();
                }
            }
            self.release_claim();
        }
        self.callback = None;
    }
}

impl Drop for SdlBackend {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_layout() {
        // SDL 1.2: int + u16 + u8 + u8 + u16 + u16 + u32，随后是两个指针
        let ptr_size = std::mem::size_of::<*mut c_void>();
        assert_eq!(std::mem::offset_of!(SdlAudioSpec, size), 12);
        assert_eq!(std::mem::offset_of!(SdlAudioSpec, callback), 16);
        assert_eq!(
            std::mem::size_of::<SdlAudioSpec>(),
            16 + 2 * ptr_size
        );
    }

    #[test]
    fn test_encode_format() {
        assert_eq!(encode_format(SampleFormat::U8) & 0xff, 8);
        assert_eq!(encode_format(SampleFormat::S16) & 0xff, 16);
        assert_eq!(encode_format(SampleFormat::S16) & 0x8000, 0x8000);
    }

    #[test]
    fn test_decode_format() {
        assert_eq!(decode_format(AUDIO_U8), Some(SampleFormat::U8));
        assert_eq!(decode_format(AUDIO_S16SYS), Some(SampleFormat::S16));
        assert_eq!(decode_format(encode_format(SampleFormat::S16)), Some(SampleFormat::S16));

        // 非本机字节序会导致每个样本字节颠倒
        let foreign = if cfg!(target_endian = "little") {
            AUDIO_S16MSB
        } else {
            AUDIO_S16LSB
        };
        assert_eq!(decode_format(foreign), None);
        // AUDIO_S8
        assert_eq!(decode_format(0x8008), None);
    }

    #[test]
    fn test_library_path_resolution() {
        // 环境变量只在这一个测试里修改
        std::env::remove_var(LIBRARY_ENV);
        assert_eq!(resolve_library_path(None), PathBuf::from(DEFAULT_LIBRARY));

        std::env::set_var(LIBRARY_ENV, "/usr/local/lib/libSDL-1.2.so.0");
        assert_eq!(
            resolve_library_path(None),
            PathBuf::from("/usr/local/lib/libSDL-1.2.so.0")
        );
        assert_eq!(
            SdlBackend::new(None).library_path(),
            Path::new("/usr/local/lib/libSDL-1.2.so.0")
        );

        // 显式配置优先于环境变量
        assert_eq!(
            resolve_library_path(Some(PathBuf::from("/opt/sdl/libSDL.so"))),
            PathBuf::from("/opt/sdl/libSDL.so")
        );

        std::env::remove_var(LIBRARY_ENV);
        assert_eq!(
            SdlBackend::new(None).library_path(),
            Path::new(DEFAULT_LIBRARY)
        );
    }

    #[test]
    fn test_missing_library_is_load_error() {
        let mut backend = SdlBackend::new(Some(PathBuf::from("/nonexistent/libSDL-missing.so")));
        assert!(matches!(
            backend.init(),
            Err(BackendError::LibraryLoad { .. })
        ));
        // 未加载时其余操作都是空操作
        backend.pause(false);
        backend.close();
    }

    #[test]
    #[ignore] // 需要系统 SDL 1.2 库和音频设备
    fn test_real_device() {
        let mut backend = SdlBackend::new(None);
        backend.init().unwrap();
        println!("Driver: {}", backend.driver_name().unwrap());

        let desired = DeviceSpec {
            sample_rate: 44100,
            format: SampleFormat::S16,
            channels: 2,
            period_frames: 1024,
        };
        let obtained = backend.open(&desired, Box::new(|out: &mut [u8]| out.fill(0))).unwrap();
        println!("Obtained: {:?}", obtained);
        backend.close();
    }
}
