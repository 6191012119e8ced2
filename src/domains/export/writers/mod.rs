pub mod workbook;
pub mod xlsx_writer;

pub use workbook::{Cell, SheetBuilder};
pub use xlsx_writer::{XlsxWriter, XlsxWriterFactory, HEADERS};
