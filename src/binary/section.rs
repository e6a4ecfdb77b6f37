use num_derive::FromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum SectionCode {
    Custom = 0x00,
    Type = 0x01,
    Import = 0x02,
    Function = 0x03,
    Table = 0x04,
    Memory = 0x05,
    Global = 0x06,
    Export = 0x07,
    Start = 0x08,
    Element = 0x09,
    Code = 0x0a,
    Data = 0x0b,
    DataCount = 0x0c,
}

impl SectionCode {
    /// Position in the mandated section order. The data count section sits
    /// between element and code even though its id is the largest.
    pub fn order(self) -> u8 {
        match self {
            SectionCode::Custom => 0,
            SectionCode::Type => 1,
            SectionCode::Import => 2,
            SectionCode::Function => 3,
            SectionCode::Table => 4,
            SectionCode::Memory => 5,
            SectionCode::Global => 6,
            SectionCode::Export => 7,
            SectionCode::Start => 8,
            SectionCode::Element => 9,
            SectionCode::DataCount => 10,
            SectionCode::Code => 11,
            SectionCode::Data => 12,
        }
    }
}
