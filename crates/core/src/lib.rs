#![forbid(unsafe_code)]

pub mod scope {
    /// Ownership scope of a catalog record: the shared master dataset or one
    /// campaign's private copy of it.
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub enum Scope {
        Master,
        Campaign(String),
    }

    impl Scope {
        pub fn campaign(id: impl Into<String>) -> Self {
            Self::Campaign(id.into())
        }

        pub fn is_master(&self) -> bool {
            matches!(self, Self::Master)
        }

        /// Storage key for the scope column. Master rows use the empty string
        /// so that (name, scope) uniqueness also covers the master dataset.
        pub fn as_key(&self) -> &str {
            match self {
                Self::Master => "",
                Self::Campaign(id) => id.as_str(),
            }
        }

        pub fn from_key(key: &str) -> Self {
            if key.is_empty() {
                Self::Master
            } else {
                Self::Campaign(key.to_string())
            }
        }
    }
}

pub mod model {
    /// Control typology. The coverage weight of a control is fixed by its
    /// kind and never supplied by the caller.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum ControlKind {
        Documental,
        Technological,
        Process,
        MeasurementBasic,
        MeasurementIntermediate,
        MeasurementAdvanced,
    }

    impl ControlKind {
        pub fn weight(self) -> f64 {
            match self {
                Self::Documental => 0.4,
                Self::Technological => 0.5,
                Self::Process => 0.6,
                Self::MeasurementBasic => 0.8,
                Self::MeasurementIntermediate => 0.9,
                Self::MeasurementAdvanced => 1.0,
            }
        }

        pub fn as_str(self) -> &'static str {
            match self {
                Self::Documental => "documental",
                Self::Technological => "technological",
                Self::Process => "process",
                Self::MeasurementBasic => "measurement_basic",
                Self::MeasurementIntermediate => "measurement_intermediate",
                Self::MeasurementAdvanced => "measurement_advanced",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "documental" => Some(Self::Documental),
                "technological" => Some(Self::Technological),
                "process" => Some(Self::Process),
                "measurement_basic" => Some(Self::MeasurementBasic),
                "measurement_intermediate" => Some(Self::MeasurementIntermediate),
                "measurement_advanced" => Some(Self::MeasurementAdvanced),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum ControlCategory {
        Preventive,
        Detective,
    }

    impl ControlCategory {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Preventive => "preventive",
                Self::Detective => "detective",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "preventive" => Some(Self::Preventive),
                "detective" => Some(Self::Detective),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum CampaignStatus {
        Open,
        Closed,
    }

    impl CampaignStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Open => "open",
                Self::Closed => "closed",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "open" => Some(Self::Open),
                "closed" => Some(Self::Closed),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum AssetStatus {
        InProduction,
        InDevelopment,
        Decommissioned,
    }

    impl AssetStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::InProduction => "in_production",
                Self::InDevelopment => "in_development",
                Self::Decommissioned => "decommissioned",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "in_production" => Some(Self::InProduction),
                "in_development" => Some(Self::InDevelopment),
                "decommissioned" => Some(Self::Decommissioned),
                _ => None,
            }
        }
    }
}

pub mod enablement {
    /// Named validation strategy for flipping a base element type to
    /// `is_enabled`. Two rule sets exist in the field; callers pick one
    /// explicitly instead of the rules being overwritten in place.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum EnablePolicy {
        /// At least one threat, at least one bound control, and every
        /// assigned threat covered by at least one positive cell.
        BasicCoverage,
        /// BasicCoverage plus per-threat minimum counts of preventive and
        /// detective controls with positive cells, and no bound control
        /// absent from the matrix.
        BalancedCoverage {
            min_preventive: usize,
            min_detective: usize,
        },
    }

    impl Default for EnablePolicy {
        fn default() -> Self {
            Self::BalancedCoverage {
                min_preventive: 2,
                min_detective: 2,
            }
        }
    }

    /// One reason an element type cannot be enabled. Validation reports
    /// every offending threat and control, not just the first, naming each
    /// by its display text (threat description, control name).
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum EnableViolation {
        NoThreats,
        NoControls,
        ThreatWithoutCoverage {
            threat: String,
        },
        ThreatBelowMinimums {
            threat: String,
            preventive: usize,
            detective: usize,
        },
        ControlNotInMatrix {
            control: String,
        },
    }

    impl std::fmt::Display for EnableViolation {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::NoThreats => {
                    write!(f, "no threats are assigned (the matrix has no rows)")
                }
                Self::NoControls => {
                    write!(f, "no controls are bound (the matrix has no columns)")
                }
                Self::ThreatWithoutCoverage { threat } => {
                    write!(f, "threat \"{threat}\" has no control value in the matrix")
                }
                Self::ThreatBelowMinimums {
                    threat,
                    preventive,
                    detective,
                } => write!(
                    f,
                    "threat \"{threat}\" is covered by {preventive} preventive and {detective} detective controls, below the required minimums"
                ),
                Self::ControlNotInMatrix { control } => {
                    write!(f, "bound control \"{control}\" appears in no matrix cell")
                }
            }
        }
    }
}

pub mod matrix {
    /// Why a cell value was rejected.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum CellValueError {
        NotFinite,
        OutOfRange,
        TooPrecise,
    }

    /// A stored cell value must lie in (0, 1] and carry at most two decimal
    /// digits. Zero is not a storable value; it means "delete the cell".
    pub fn validate_cell_value(value: f64) -> Result<(), CellValueError> {
        if !value.is_finite() {
            return Err(CellValueError::NotFinite);
        }
        if value <= 0.0 || value > 1.0 {
            return Err(CellValueError::OutOfRange);
        }
        let scaled = value * 100.0;
        if (scaled - scaled.round()).abs() > 1e-9 {
            return Err(CellValueError::TooPrecise);
        }
        Ok(())
    }

    /// Displayed size of an element type's risk matrix.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum MatrixDimensions {
        /// Neither threats nor controls are present ("N/D").
        Empty,
        Size {
            threats: usize,
            controls: usize,
            /// True when the counts come from recursive aggregation over
            /// components rather than direct assignment.
            aggregated: bool,
        },
    }

    impl std::fmt::Display for MatrixDimensions {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty => write!(f, "N/D"),
                Self::Size {
                    threats,
                    controls,
                    aggregated: false,
                } => write!(f, "{threats} x {controls}"),
                Self::Size {
                    threats,
                    controls,
                    aggregated: true,
                } => write!(f, "{threats} x {controls} (A)"),
            }
        }
    }
}
