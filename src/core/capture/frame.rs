use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use image::{ImageOutputFormat, RgbImage};

use super::CaptureError;

/// 相机帧数据 (RGB8, 行优先)
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub captured_at: DateTime<Local>,
}

impl Frame {
    pub const CHANNELS: u32 = 3;

    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CaptureError> {
        let expected = Self::expected_len(width, height);
        if data.len() != expected {
            return Err(CaptureError::BadFrameSize {
                actual: data.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            data,
            captured_at: Local::now(),
        })
    }

    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * Self::CHANNELS as usize
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// 顺时针旋转，只接受 0/90/180/270
    pub fn rotated(self, degrees: u32) -> Result<Frame, CaptureError> {
        let captured_at = self.captured_at;
        let img = self.into_image()?;
        let rotated = match degrees % 360 {
            0 => img,
            90 => image::imageops::rotate90(&img),
            180 => image::imageops::rotate180(&img),
            270 => image::imageops::rotate270(&img),
            other => return Err(CaptureError::UnsupportedRotation(other)),
        };

        Ok(Frame {
            width: rotated.width(),
            height: rotated.height(),
            data: rotated.into_raw(),
            captured_at,
        })
    }

    /// 按扩展名编码 (jpg/jpeg/png) 写入 `path`
    ///
    /// 先写同目录下的 `.part` 临时文件再落到目标名，目录轮询方不会看到半截文件。
    /// 目标已存在时返回 `AlreadyExists`，不覆盖。
    pub fn write_to_path(&self, path: &Path) -> Result<(), CaptureError> {
        let format = output_format(path)?;
        let img = RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            CaptureError::BadFrameSize {
                actual: self.data.len(),
                expected: Self::expected_len(self.width, self.height),
            },
        )?;

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        // NamedTempFile 出错时 drop 会删掉临时文件
        let staging = tempfile::Builder::new()
            .prefix(".")
            .suffix(".part")
            .tempfile_in(parent)?;
        {
            let mut writer = BufWriter::new(staging.as_file());
            img.write_to(&mut writer, format)
                .map_err(|e| CaptureError::Encode(e.to_string()))?;
            writer.flush()?;
        }

        staging
            .persist_noclobber(path)
            .map_err(|e| match e.error.kind() {
                io::ErrorKind::AlreadyExists => CaptureError::AlreadyExists(path.to_path_buf()),
                _ => CaptureError::from(e.error),
            })?;
        Ok(())
    }

    /// 在 `dir` 下新建 `<prefix>_<YYYYmmdd_HHMMSS_微秒>.jpg`
    ///
    /// 文件名在进程内不重复（已认领的名字不会再出现），
    /// 万一撞名依次换成 `_1`、`_2` ...，返回实际写入的路径。
    pub fn save_new(&self, dir: &Path, prefix: &str) -> Result<PathBuf, CaptureError> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%6f").to_string();
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}_{}.jpg", prefix, stamp)
            } else {
                format!("{}_{}_{}.jpg", prefix, stamp, attempt)
            };
            let path = dir.join(name);
            match self.write_to_path(&path) {
                Ok(()) => return Ok(path),
                Err(CaptureError::AlreadyExists(_)) => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    fn into_image(self) -> Result<RgbImage, CaptureError> {
        let actual = self.data.len();
        let expected = Self::expected_len(self.width, self.height);
        RgbImage::from_raw(self.width, self.height, self.data)
            .ok_or(CaptureError::BadFrameSize { actual, expected })
    }
}

fn output_format(path: &Path) -> Result<ImageOutputFormat, CaptureError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => Ok(ImageOutputFormat::Jpeg(90)),
        "png" => Ok(ImageOutputFormat::Png),
        _ => Err(CaptureError::UnsupportedFormat(path.display().to_string())),
    }
}
