#[macro_export]
macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            Ord,
            PartialOrd,
            Debug,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            pub fn unique() -> $name {
                $name(uuid::Uuid::new_v4())
            }
            pub fn nil() -> $name {
                $name(uuid::Uuid::nil())
            }
            pub fn is_nil(&self) -> bool {
                self.0 == uuid::Uuid::nil()
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> $name {
                $name(uuid)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> uuid::Uuid {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(id: &str) -> Result<$name, Self::Err> {
                let uuid = uuid::Uuid::parse_str(id)?;
                Ok($name(uuid))
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> $name {
                let uuid = uuid::Uuid::parse_str(id)
                    .expect(concat!("invalid UUID string for ", stringify!($name)));
                $name(uuid)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
        impl Default for $name {
            fn default() -> $name {
                $name::nil()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    id_type!(TestId);

    #[test]
    fn unique_ids_differ() {
        let a = TestId::unique();
        let b = TestId::unique();
        assert_ne!(a, b);
        assert!(!a.is_nil());
    }

    #[test]
    fn default_is_nil() {
        assert!(TestId::default().is_nil());
        assert_eq!(TestId::default(), TestId::nil());
    }

    #[test]
    fn parses_from_str() {
        let id: TestId = "5f7dca60-37c4-4f3a-81c5-0d3d9a30c1f8".into();
        assert_eq!(id.to_string(), "5f7dca60-37c4-4f3a-81c5-0d3d9a30c1f8");
    }
}
