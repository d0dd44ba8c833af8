use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Channels::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Channels::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Channels::ChannelType)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Channels::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Channels::Key).text().not_null())
                    .col(
                        ColumnDef::new(Channels::Status)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Channels::Weight)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Channels::Priority)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Channels::Group)
                            .string_len(255)
                            .not_null()
                            .default("default"),
                    )
                    .col(ColumnDef::new(Channels::Models).text().not_null())
                    .col(
                        ColumnDef::new(Channels::AutoDisable)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    // 多Key聚合信息（JSON）
                    .col(
                        ColumnDef::new(Channels::MultiKeyInfo)
                            .json()
                            .not_null()
                            .default("{}"),
                    )
                    // 自动禁用记录
                    .col(ColumnDef::new(Channels::AutoDisabledReason).text().null())
                    .col(ColumnDef::new(Channels::AutoDisabledTime).big_integer().null())
                    .col(
                        ColumnDef::new(Channels::AutoDisabledModel)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Channels::CreatedTime)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_channels_name")
                    .table(Channels::Table)
                    .col(Channels::Name)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_channels_status")
                    .table(Channels::Table)
                    .col(Channels::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Channels::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Channels {
    Table,
    Id,
    ChannelType,
    Name,
    Key,
    Status,
    Weight,
    Priority,
    Group,
    Models,
    AutoDisable,
    MultiKeyInfo,
    AutoDisabledReason,
    AutoDisabledTime,
    AutoDisabledModel,
    CreatedTime,
}
