pub type StreamResult<T> = Result<T, StreamError>;

#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("format error: {0}")]
    Format(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("gpu error: {0}")]
    Gpu(String),

    #[error("i/o fault at byte offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StreamError {
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    pub fn io(offset: u64, source: std::io::Error) -> Self {
        Self::Io { offset, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            StreamError::format("x")
                .to_string()
                .contains("format error:")
        );
        assert!(
            StreamError::channel("x")
                .to_string()
                .contains("channel error:")
        );
        assert!(StreamError::gpu("x").to_string().contains("gpu error:"));
    }

    #[test]
    fn io_fault_reports_offset_and_source() {
        let err = StreamError::io(4096, std::io::Error::other("boom"));
        let msg = err.to_string();
        assert!(msg.contains("4096"));
        let src = std::error::Error::source(&err).expect("source");
        assert!(src.to_string().contains("boom"));
    }
}
