//! 标定报告产物
//!
//! 引擎产出数据，写文件/打印由外层调用方（CLI）负责。

use serde::Serialize;
use std::fmt;
use std::io;

/// 一次端点测量的结果：三塔高度，可选中心高度
///
/// 塔下标与 `M666 X/Y/Z`、探测顺序一致。
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EndpointReport {
    pub towers: [f64; 3],
    pub center: Option<f64>,
}

impl EndpointReport {
    pub fn new(towers: [f64; 3], center: Option<f64>) -> Self {
        Self { towers, center }
    }

    /// 三塔之间的高度偏差（端点回路的收敛判据）
    pub fn tower_deviation(&self) -> f64 {
        let max = self.towers.iter().copied().fold(f64::MIN, f64::max);
        let min = self.towers.iter().copied().fold(f64::MAX, f64::min);
        max - min
    }

    /// 三塔均值与中心的偏差（半径回路的收敛判据）
    ///
    /// 没有中心测量时为 0。
    pub fn center_deviation(&self) -> f64 {
        match self.center {
            Some(center) => {
                let mean = self.towers.iter().sum::<f64>() / 3.0;
                (mean - center).abs()
            },
            None => 0.0,
        }
    }

    /// 全部测量点的平面度偏差（验证报告用，含中心）
    pub fn flatness_deviation(&self) -> f64 {
        let mut max = f64::MIN;
        let mut min = f64::MAX;
        for z in self.towers.iter().copied().chain(self.center) {
            max = max.max(z);
            min = min.min(z);
        }
        max - min
    }
}

impl fmt::Display for EndpointReport {
    /// 固定的 ASCII 三角图，各顶点标注测得高度
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "            Z {:>7.2}", self.towers[2])?;
        writeln!(f, "            /\\")?;
        writeln!(f, "           /  \\")?;
        match self.center {
            Some(center) => writeln!(f, "          /{:>5.2}\\", center)?,
            None => writeln!(f, "          /    \\")?,
        }
        writeln!(f, "         /      \\")?;
        writeln!(f, "  X {:>7.2} -- Y {:>7.2}", self.towers[0], self.towers[1])?;
        write!(f, "  deviation: {:.2}mm", self.flatness_deviation())
    }
}

/// 床面网格上的一个采样点
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BedPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// 床面高度图，绘图工具消费的 CSV 的内存形态
#[derive(Debug, Clone, Default, Serialize)]
pub struct BedMap {
    pub points: Vec<BedPoint>,
}

impl BedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, x: f64, y: f64, z: f64) {
        self.points.push(BedPoint { x, y, z });
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// 写出 `X,Y,Z` 表头 + 每点一行的 CSV
    pub fn write_csv<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "X,Y,Z")?;
        for point in &self.points {
            writeln!(writer, "{},{},{}", point.x, point.y, point.z)?;
        }
        Ok(())
    }

    pub fn to_csv_string(&self) -> String {
        let mut buf = Vec::new();
        self.write_csv(&mut buf).expect("write to Vec cannot fail");
        String::from_utf8(buf).expect("CSV is ASCII")
    }
}
