//! 串口行通道实现

use crate::{LINE_TERMINATOR, LineBuffer, LineTransport, LinkError};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// 单次底层读取的块大小
const READ_CHUNK: usize = 256;

/// 底层串口的读超时（短超时 + 上层截止时间轮询）
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// 真实串口上的行通道
pub struct SerialLineTransport {
    port: Box<dyn SerialPort>,
    buffer: LineBuffer,
}

impl SerialLineTransport {
    /// 打开串口
    ///
    /// Monoprice 的 USB 串口适配器有个必须原样复刻的怪癖：先以奇校验
    /// 打开一次端口，再以无校验重新打开，然后才关闭第一个句柄。跳过
    /// 这个序列设备可能完全不应答。
    ///
    /// # Arguments
    /// * `path` - 串口路径（如 `/dev/ttyACM0`）
    /// * `baud_rate` - 波特率（MiniDelta 固定 115200）
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, LinkError> {
        let quirk = serialport::new(path, baud_rate)
            .parity(Parity::Odd)
            .timeout(PORT_READ_TIMEOUT)
            .open()?;

        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(PORT_READ_TIMEOUT)
            .open()?;

        drop(quirk);

        info!("Opened serial port: {} at {} baud", path, baud_rate);

        Ok(Self {
            port,
            buffer: LineBuffer::new(),
        })
    }

    /// 读一块字节进缓冲；底层读超时映射为 0 字节
    fn fill_buffer(&mut self) -> Result<usize, LinkError> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.port.read(&mut chunk) {
            Ok(n) => {
                self.buffer.push_bytes(&chunk[..n]);
                Ok(n)
            },
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl LineTransport for SerialLineTransport {
    fn send_line(&mut self, line: &str) -> Result<(), LinkError> {
        let mut out = String::with_capacity(line.len() + 1);
        out.push_str(line);
        out.push(LINE_TERMINATOR);
        self.port.write_all(out.as_bytes())?;
        self.port.flush()?;
        debug!(target: "delta_link::serial", "tx: {}", line);
        Ok(())
    }

    fn receive_line(&mut self, timeout: Duration) -> Result<String, LinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.buffer.pop_line() {
                return Ok(line);
            }
            if self.fill_buffer()? == 0 && Instant::now() >= deadline {
                return Err(LinkError::Timeout);
            }
        }
    }
}
