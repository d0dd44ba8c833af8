use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Abilities::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Abilities::Group).string_len(64).not_null())
                    .col(ColumnDef::new(Abilities::Model).string_len(255).not_null())
                    .col(ColumnDef::new(Abilities::ChannelId).integer().not_null())
                    .col(
                        ColumnDef::new(Abilities::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Abilities::Priority)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .primary_key(
                        Index::create()
                            .col(Abilities::Group)
                            .col(Abilities::Model)
                            .col(Abilities::ChannelId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_abilities_channel_id")
                            .from(Abilities::Table, Abilities::ChannelId)
                            .to(Channels::Table, Channels::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // 调度查询按 (group, model, enabled, priority) 过滤
        manager
            .create_index(
                Index::create()
                    .name("idx_abilities_lookup")
                    .table(Abilities::Table)
                    .col(Abilities::Group)
                    .col(Abilities::Model)
                    .col(Abilities::Enabled)
                    .col(Abilities::Priority)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_abilities_channel_id")
                    .table(Abilities::Table)
                    .col(Abilities::ChannelId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Abilities::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Abilities {
    Table,
    Group,
    Model,
    ChannelId,
    Enabled,
    Priority,
}

#[derive(DeriveIden)]
enum Channels {
    Table,
    Id,
}
