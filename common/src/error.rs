use std::fmt;
use std::path::PathBuf;

#[doc = "诊断日志对齐的稳定错误码标识。"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    #[doc = "PRYLOCK-SCAN-101: 系统句柄快照查询失败。"]
    Scan101,
    #[doc = "PRYLOCK-LOCATE-201: 目标文件未被任何进程持有。"]
    Locate201,
    #[doc = "PRYLOCK-LOCATE-202: 目标路径无法归一化为内核后缀。"]
    Locate202,
    #[doc = "PRYLOCK-LOCATE-211: 打开持有进程被拒绝。"]
    Locate211,
    #[doc = "PRYLOCK-LOCATE-212: 候选句柄复制失败。"]
    Locate212,
    #[doc = "PRYLOCK-LOCATE-213: 句柄对象名解析失败。"]
    Locate213,
    #[doc = "PRYLOCK-COPY-301: 只读文件映射失败。"]
    Copy301,
    #[doc = "PRYLOCK-COPY-302: 目标文件写入失败。"]
    Copy302,
    #[doc = "PRYLOCK-COPY-303: 源文件在复制时长度为零。"]
    Copy303,
    #[doc = "PRYLOCK-CONFIG-901: 配置无效。"]
    Config901,
}

impl ErrorCode {
    #[doc = "返回规范化错误码字符串。"]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Scan101 => "PRYLOCK-SCAN-101",
            ErrorCode::Locate201 => "PRYLOCK-LOCATE-201",
            ErrorCode::Locate202 => "PRYLOCK-LOCATE-202",
            ErrorCode::Locate211 => "PRYLOCK-LOCATE-211",
            ErrorCode::Locate212 => "PRYLOCK-LOCATE-212",
            ErrorCode::Locate213 => "PRYLOCK-LOCATE-213",
            ErrorCode::Copy301 => "PRYLOCK-COPY-301",
            ErrorCode::Copy302 => "PRYLOCK-COPY-302",
            ErrorCode::Copy303 => "PRYLOCK-COPY-303",
            ErrorCode::Config901 => "PRYLOCK-CONFIG-901",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[doc = "prylock 的统一错误类型。"]
#[derive(thiserror::Error, Debug)]
pub enum PrylockError {
    #[doc = "系统句柄快照查询失败（非缓冲区长度类状态码）。"]
    #[error("系统句柄快照查询失败: NTSTATUS {status:#010x}")]
    OsQuery { status: u32 },

    #[doc = "没有进程持有目标文件。"]
    #[error("没有进程持有目标文件: {}", .path.display())]
    NotFound { path: PathBuf },

    #[doc = "目标路径无法归一化为内核后缀。"]
    #[error("目标路径无法归一化为内核后缀: {}", .path.display())]
    InvalidPath { path: PathBuf },

    #[doc = "打开持有进程被拒绝。逐候选噪声，定位循环内吞掉。"]
    #[error("打开进程 {pid} 被拒绝 (os error {os_error})")]
    AccessDenied { pid: u32, os_error: u32 },

    #[doc = "候选句柄复制失败。逐候选噪声，定位循环内吞掉。"]
    #[error("复制句柄 {handle_value:#x} 失败 (os error {os_error})")]
    DuplicationFailed { handle_value: usize, os_error: u32 },

    #[doc = "句柄对象名解析失败。逐候选噪声，定位循环内吞掉。"]
    #[error("句柄对象名解析失败")]
    ResolutionFailed,

    #[doc = "只读文件映射失败。"]
    #[error("只读文件映射失败 ({stage}, os error {os_error})")]
    MapFailed { stage: &'static str, os_error: u32 },

    #[doc = "目标文件写入失败。"]
    #[error("写入目标文件失败: {}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[doc = "源文件在复制时观察到零长度。"]
    #[error("源文件在复制时观察到零长度")]
    EmptySource,

    #[doc = "配置错误。"]
    #[error("配置错误: {message}")]
    Config { message: String },

    #[doc = "IO 错误。"]
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl PrylockError {
    #[doc = "返回该错误对应的稳定错误码，IO 错误没有专属码。"]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            PrylockError::OsQuery { .. } => Some(ErrorCode::Scan101),
            PrylockError::NotFound { .. } => Some(ErrorCode::Locate201),
            PrylockError::InvalidPath { .. } => Some(ErrorCode::Locate202),
            PrylockError::AccessDenied { .. } => Some(ErrorCode::Locate211),
            PrylockError::DuplicationFailed { .. } => Some(ErrorCode::Locate212),
            PrylockError::ResolutionFailed => Some(ErrorCode::Locate213),
            PrylockError::MapFailed { .. } => Some(ErrorCode::Copy301),
            PrylockError::WriteFailed { .. } => Some(ErrorCode::Copy302),
            PrylockError::EmptySource => Some(ErrorCode::Copy303),
            PrylockError::Config { .. } => Some(ErrorCode::Config901),
            PrylockError::Io(_) => None,
        }
    }
}
