//! 支持格式表
//!
//! 编译期常量，进程内只读

use std::ffi::OsStr;
use std::fmt;
use std::path::Path;

/// 唯一可直接解析的格式
pub const NATIVE_EXTENSION: &str = "wav";

/// 所有受支持扩展名（原生 + 需转码）
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "wav", "mp3", "flac", "m4a", "m4r", "aac", "ac3", "aif", "aiff", "alac", "ogg", "opus", "wma",
];

/// 文件对话框过滤器条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub label: &'static str,
    pub extensions: &'static [&'static str],
}

impl fmt::Display for FormatDescriptor {
    /// 渲染为 `"FLAC Files (*.flac)"`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.label)?;
        for (i, ext) in self.extensions.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "*.{}", ext)?;
        }
        f.write_str(")")
    }
}

const WAV_FILES: FormatDescriptor = FormatDescriptor {
    label: "WAV Files",
    extensions: &["wav"],
};

const WAV_ONLY: &[FormatDescriptor] = &[WAV_FILES];

const ALL_FORMATS: &[FormatDescriptor] = &[
    FormatDescriptor {
        label: "All Audio Files",
        extensions: SUPPORTED_EXTENSIONS,
    },
    WAV_FILES,
    FormatDescriptor {
        label: "MP3 Files",
        extensions: &["mp3"],
    },
    FormatDescriptor {
        label: "FLAC Files",
        extensions: &["flac"],
    },
    FormatDescriptor {
        label: "M4A Files",
        extensions: &["m4a"],
    },
    FormatDescriptor {
        label: "M4R Files",
        extensions: &["m4r"],
    },
    FormatDescriptor {
        label: "AAC Files",
        extensions: &["aac"],
    },
    FormatDescriptor {
        label: "AC3 Files",
        extensions: &["ac3"],
    },
    FormatDescriptor {
        label: "AIF/AIFF Files",
        extensions: &["aif", "aiff"],
    },
    FormatDescriptor {
        label: "ALAC Files",
        extensions: &["alac"],
    },
    FormatDescriptor {
        label: "OGG Files",
        extensions: &["ogg"],
    },
    FormatDescriptor {
        label: "Opus Files",
        extensions: &["opus"],
    },
    FormatDescriptor {
        label: "WMA Files",
        extensions: &["wma"],
    },
];

/// 格式查询
pub struct FormatCatalog;

impl FormatCatalog {
    /// 扩展名是否受支持（大小写不敏感，允许前导点）
    pub fn is_supported(extension: &str) -> bool {
        let ext = normalize(extension);
        SUPPORTED_EXTENSIONS.contains(&ext.as_str())
    }

    /// 是否可直接解析，无需转码
    pub fn is_native(extension: &str) -> bool {
        normalize(extension) == NATIVE_EXTENSION
    }

    /// 对外宣传的格式列表
    pub fn descriptors(transcoder_available: bool) -> &'static [FormatDescriptor] {
        if transcoder_available {
            ALL_FORMATS
        } else {
            WAV_ONLY
        }
    }
}

/// 取小写扩展名
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_lowercase)
}

fn normalize(extension: &str) -> String {
    extension.trim_start_matches('.').to_lowercase()
}
