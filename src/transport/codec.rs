//! 图像编解码与JSON分帧
//! Image transport codec and JSON value framing

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::de::DeserializeOwned;

use crate::error::ChannelError;
use crate::types::{Frame, FrameSize};

/// RGB图像 → JPEG字节
pub fn image_to_bytes(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ChannelError> {
    let mut bytes = Vec::with_capacity(image.as_raw().len() / 8);
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), quality);
    image.write_with_encoder(encoder)?;
    Ok(bytes)
}

/// JPEG(或任意支持格式)字节 → RGB图像
pub fn bytes_to_image(bytes: &[u8]) -> Result<RgbImage, ChannelError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// 由帧头和图像载荷重建帧. 解码后尺寸必须与帧头一致.
pub fn decode_frame(size: FrameSize, seq: u64, payload: &[u8]) -> Result<Frame, ChannelError> {
    let image = bytes_to_image(payload)?;
    let got = FrameSize::of(&image);
    if got.height() != size.height() || got.width() != size.width() {
        return Err(ChannelError::SizeMismatch {
            expected: size,
            got,
        });
    }
    Ok(Frame::new(image, seq))
}

/// 从缓冲区头部解析一个完整的JSON值.
///
/// 返回 `Ok(None)` 表示数据还不完整; 成功时返回值及其占用的字节数.
pub fn take_json<T: DeserializeOwned>(buf: &[u8]) -> Result<Option<(T, usize)>, ChannelError> {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<T>();
    match stream.next() {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some((value, stream.byte_offset()))),
        Some(Err(e)) if e.is_eof() => Ok(None),
        Some(Err(e)) => Err(e.into()),
    }
}
