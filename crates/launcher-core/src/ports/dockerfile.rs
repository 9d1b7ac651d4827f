use std::{fs, path::Path};

use launcher_model::PortMapping;

/// Ports named by `EXPOSE` directives, each reported unmapped.
pub(super) fn parse(config: &Path) -> Vec<PortMapping> {
    let Ok(raw) = fs::read_to_string(config) else {
        return Vec::new();
    };

    let mut ports = Vec::new();
    for line in raw.lines() {
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            continue;
        };
        if !keyword.eq_ignore_ascii_case("expose") {
            continue;
        }
        for word in words {
            let port = word.split('/').next().unwrap_or(word);
            if let Ok(port) = port.parse::<u16>() {
                ports.push(PortMapping::unmapped(port));
            }
        }
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_expose_directives() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("Dockerfile");
        fs::write(
            &config,
            "FROM alpine\n# EXPOSE 1\nexpose 8080/tcp 9090/udp\n  EXPOSE 1337\nEXPOSE $PORT 7000-7002\nRUN echo EXPOSE 22\n",
        )
        .unwrap();

        assert_eq!(
            parse(&config),
            vec![
                PortMapping::unmapped(8080),
                PortMapping::unmapped(9090),
                PortMapping::unmapped(1337),
            ]
        );
    }
}
